use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

/// How a peer answered a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Accepted,
    /// The peer refused the payload
    Rejected,
    /// The peer believes our chain and theirs have diverged
    Conflict,
    Unreachable,
}

impl PeerStatus {
    pub fn from_status_code(status: StatusCode) -> Self {
        if status.is_success() {
            PeerStatus::Accepted
        } else if status == StatusCode::CONFLICT {
            PeerStatus::Conflict
        } else {
            PeerStatus::Rejected
        }
    }
}

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} answered {status}")]
    BadStatus { peer: String, status: u16 },

    #[error("Malformed response from {peer}: {reason}")]
    MalformedResponse { peer: String, reason: String },
}

/// Outbound side of the peer protocol. Each call is a single attempt.
#[async_trait]
pub trait PeerBroadcaster: Send + Sync {
    async fn broadcast_transaction(&self, peer: &str, tx: &Transaction) -> PeerStatus;

    async fn broadcast_block(&self, peer: &str, block: &Block) -> PeerStatus;

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError>;
}

#[derive(Serialize)]
struct BlockEnvelope<'a> {
    block: &'a Block,
}

/// Talks to peers over their `/api/v1` HTTP surface
#[derive(Debug, Clone)]
pub struct HttpBroadcaster {
    client: Client,
}

impl HttpBroadcaster {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpBroadcaster { client })
    }

    fn url(peer: &str, path: &str) -> String {
        format!("http://{}/api/v1/{}", peer, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, peer: &str, path: &str, body: &T) -> PeerStatus {
        match self.client.post(Self::url(peer, path)).json(body).send().await {
            Ok(resp) => PeerStatus::from_status_code(resp.status()),
            Err(_) => PeerStatus::Unreachable,
        }
    }
}

#[async_trait]
impl PeerBroadcaster for HttpBroadcaster {
    async fn broadcast_transaction(&self, peer: &str, tx: &Transaction) -> PeerStatus {
        self.post(peer, "broadcast-transaction", tx).await
    }

    async fn broadcast_block(&self, peer: &str, block: &Block) -> PeerStatus {
        self.post(peer, "broadcast-block", &BlockEnvelope { block }).await
    }

    async fn fetch_chain(&self, peer: &str) -> Result<Vec<Block>, PeerError> {
        let resp = self
            .client
            .get(Self::url(peer, "chain"))
            .send()
            .await
            .map_err(|e| PeerError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(PeerError::BadStatus {
                peer: peer.to_string(),
                status: resp.status().as_u16(),
            });
        }

        resp.json::<Vec<Block>>()
            .await
            .map_err(|e| PeerError::MalformedResponse {
                peer: peer.to_string(),
                reason: e.to_string(),
            })
    }
}
