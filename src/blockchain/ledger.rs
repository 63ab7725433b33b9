use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use thiserror::Error;

use super::block::Block;
use super::crypto::Address;
use super::peers::{PeerBroadcaster, PeerStatus};
use super::storage::{PersistenceStore, StorageError};
use super::transaction::Transaction;
use super::verification::{
    balance_of, is_confirmed, proof_of_work, valid_proof, valid_reward, valid_rewards, verify_chain,
    verify_transaction,
};

/// Rounds a mining attempt may restart because the tip moved underneath it
pub const MAX_MINING_ATTEMPTS: usize = 3;

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("The mining reward sender cannot be used in a submitted transaction")]
    ReservedSender,

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Transaction is already pending or confirmed")]
    DuplicateTransaction,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: f64, available: f64 },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Conflicts must be resolved before mining")]
    ResolutionRequired,

    #[error("Pending transaction with an invalid signature, mining aborted")]
    CorruptPool,

    #[error("Chain tip kept moving while mining")]
    StaleTip,

    #[error("Invalid chain: {0}")]
    InvalidChain(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("System error: {0}")]
    System(String),
}

/// Where an inbound transaction came from. Peer input is never re-broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Peer,
}

/// Outcome of a block a peer pushed to us
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReception {
    /// Next in line and valid; now our tip
    Appended,
    /// Next in line but failed validation
    Rejected(String),
    /// The peer is more than one block ahead; resolution is now required
    AheadOfLocal,
    /// At or below our tip
    Stale,
}

struct LedgerState {
    chain: Vec<Block>,
    open_transactions: Vec<Transaction>,
    peer_nodes: BTreeSet<String>,
    needs_resolution: bool,
}

/// Pending work captured for one proof search
struct MiningJob {
    index: u64,
    previous_hash: String,
    transfers: Vec<Transaction>,
}

/// The ledger state machine.
///
/// Chain, pending pool, peer set and the resolution flag sit behind one lock;
/// every mutation takes it exclusively. Persistence happens under the lock,
/// peer traffic after it is released.
pub struct Ledger {
    state: RwLock<LedgerState>,
    difficulty: usize,
    reward: f64,
    identity: Address,
    store: Arc<dyn PersistenceStore>,
    broadcaster: Arc<dyn PeerBroadcaster>,
}

impl Ledger {
    /// Restores the ledger from `store`, or starts from genesis if the store
    /// is empty. A stored chain that fails verification is fatal.
    pub fn open(
        difficulty: usize,
        reward: f64,
        identity: Address,
        store: Arc<dyn PersistenceStore>,
        broadcaster: Arc<dyn PeerBroadcaster>,
    ) -> Result<Self, LedgerError> {
        let state = match store.load()? {
            Some(saved) => {
                if !verify_chain(&saved.chain, difficulty) || !valid_rewards(&saved.chain, reward) {
                    return Err(LedgerError::InvalidChain(format!(
                        "stored chain of {} blocks failed verification",
                        saved.chain.len()
                    )));
                }
                info!(
                    "Loaded {} blocks, {} pending transactions and {} peers from storage",
                    saved.chain.len(),
                    saved.open_transactions.len(),
                    saved.peers.len()
                );
                LedgerState {
                    chain: saved.chain,
                    open_transactions: saved.open_transactions,
                    peer_nodes: saved.peers,
                    needs_resolution: false,
                }
            }
            None => {
                info!("No existing chain found in storage, starting from genesis");
                let state = LedgerState {
                    chain: vec![Block::genesis()],
                    open_transactions: Vec::new(),
                    peer_nodes: BTreeSet::new(),
                    needs_resolution: false,
                };
                store.save(&state.chain, &state.open_transactions, &state.peer_nodes)?;
                state
            }
        };

        Ok(Ledger {
            state: RwLock::new(state),
            difficulty,
            reward,
            identity,
            store,
            broadcaster,
        })
    }

    pub fn identity(&self) -> &Address {
        &self.identity
    }

    pub fn chain(&self) -> Vec<Block> {
        self.state.read().chain.clone()
    }

    pub fn open_transactions(&self) -> Vec<Transaction> {
        self.state.read().open_transactions.clone()
    }

    pub fn peers(&self) -> Vec<String> {
        self.state.read().peer_nodes.iter().cloned().collect()
    }

    pub fn needs_resolution(&self) -> bool {
        self.state.read().needs_resolution
    }

    /// Balance of `identity` (this node when `None`) over chain and pending pool
    pub fn get_balance(&self, identity: Option<&Address>) -> f64 {
        let who = identity.unwrap_or(&self.identity);
        let state = self.state.read();
        balance_of(who, &state.chain, &state.open_transactions)
    }

    fn persist(&self, state: &LedgerState) {
        if let Err(err) = self
            .store
            .save(&state.chain, &state.open_transactions, &state.peer_nodes)
        {
            error!("Saving ledger state failed: {}", err);
        }
    }

    /// Validates `tx` against chain plus pending pool and queues it.
    /// Local submissions are then broadcast to every peer.
    pub async fn submit_transaction(&self, tx: Transaction, origin: Origin) -> Result<Transaction, LedgerError> {
        let peers = {
            let mut state = self.state.write();
            Self::check_submission(&state, &tx)?;

            state.open_transactions.push(tx.clone());
            self.persist(&state);
            state.peer_nodes.iter().cloned().collect::<Vec<_>>()
        };

        info!("Accepted transaction {} -> {} ({})", tx.sender, tx.recipient, tx.amount);

        if origin == Origin::Local {
            let rounds = peers
                .iter()
                .map(|peer| self.broadcaster.broadcast_transaction(peer, &tx));
            let statuses = join_all(rounds).await;
            self.record_broadcast("transaction", &peers, &statuses);
        }

        Ok(tx)
    }

    fn check_submission(state: &LedgerState, tx: &Transaction) -> Result<(), LedgerError> {
        if tx.is_reward() {
            return Err(LedgerError::ReservedSender);
        }
        if !tx.amount.is_finite() || tx.amount <= 0.0 {
            return Err(LedgerError::InvalidAmount(tx.amount));
        }

        if state.open_transactions.contains(tx) || is_confirmed(&state.chain, tx) {
            return Err(LedgerError::DuplicateTransaction);
        }

        let available = balance_of(&tx.sender, &state.chain, &state.open_transactions);
        if !verify_transaction(tx, |_| available) {
            if !tx.verify_signature() {
                return Err(LedgerError::InvalidSignature);
            }
            return Err(LedgerError::InsufficientFunds {
                required: tx.amount,
                available,
            });
        }

        Ok(())
    }

    /// Mines the pending pool into a new block paying this node the reward.
    ///
    /// The proof search runs on a blocking thread without the lock held. If
    /// the tip moved meanwhile the result is discarded and the search restarts,
    /// at most [`MAX_MINING_ATTEMPTS`] times.
    pub async fn mine(&self) -> Result<Block, LedgerError> {
        for attempt in 1..=MAX_MINING_ATTEMPTS {
            let job = self.prepare_mining_job()?;

            let difficulty = self.difficulty;
            let transfers = job.transfers.clone();
            let previous_hash = job.previous_hash.clone();
            let proof = tokio::task::spawn_blocking(move || proof_of_work(&transfers, &previous_hash, difficulty))
                .await
                .map_err(|e| LedgerError::System(e.to_string()))?;

            match self.commit_mined(job, proof) {
                Some((block, peers)) => {
                    info!(
                        "Mined block {} with {} transactions (proof {})",
                        block.index,
                        block.transactions.len(),
                        block.proof
                    );
                    let rounds = peers
                        .iter()
                        .map(|peer| self.broadcaster.broadcast_block(peer, &block));
                    let statuses = join_all(rounds).await;
                    self.record_broadcast("block", &peers, &statuses);
                    return Ok(block);
                }
                None => {
                    warn!("Chain tip moved during mining attempt {}, retrying", attempt);
                }
            }
        }

        Err(LedgerError::StaleTip)
    }

    fn prepare_mining_job(&self) -> Result<MiningJob, LedgerError> {
        let state = self.state.read();
        if state.needs_resolution {
            return Err(LedgerError::ResolutionRequired);
        }

        let transfers = state.open_transactions.clone();
        if let Some(bad) = transfers.iter().find(|tx| !tx.verify_signature()) {
            warn!("Pending transaction from {} has an invalid signature", bad.sender);
            return Err(LedgerError::CorruptPool);
        }

        let tip = state.chain.last().ok_or_else(|| LedgerError::InvalidChain("empty chain".to_string()))?;

        Ok(MiningJob {
            index: state.chain.len() as u64,
            previous_hash: tip.hash(),
            transfers,
        })
    }

    fn commit_mined(&self, job: MiningJob, proof: u64) -> Option<(Block, Vec<String>)> {
        let mut state = self.state.write();

        let tip_hash = state.chain.last().map(Block::hash)?;
        if state.chain.len() as u64 != job.index || tip_hash != job.previous_hash {
            return None;
        }

        let mut transactions = job.transfers;
        transactions.push(Transaction::reward(self.identity.clone(), self.reward));
        let block = Block::new(job.index, job.previous_hash, transactions, proof);

        // Transactions submitted while the search ran stay pending
        let included = block.transfers();
        state.open_transactions.retain(|tx| !included.contains(tx));
        state.chain.push(block.clone());
        self.persist(&state);

        let peers = state.peer_nodes.iter().cloned().collect();
        Some((block, peers))
    }

    fn record_broadcast(&self, what: &str, peers: &[String], statuses: &[PeerStatus]) {
        for (peer, status) in peers.iter().zip(statuses) {
            match status {
                PeerStatus::Accepted => debug!("Peer {} accepted {}", peer, what),
                PeerStatus::Rejected => warn!("Peer {} declined {}, needs resolving", peer, what),
                PeerStatus::Conflict => {
                    warn!("Peer {} reported a conflict on {}", peer, what);
                    self.state.write().needs_resolution = true;
                }
                PeerStatus::Unreachable => warn!("Peer {} unreachable, {} not delivered", peer, what),
            }
        }
    }

    /// Appends a block received from a peer if it extends our tip
    pub fn ingest_block(&self, block: Block) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        self.ingest_locked(&mut state, block)
    }

    fn ingest_locked(&self, state: &mut LedgerState, block: Block) -> Result<(), LedgerError> {
        let tip = state
            .chain
            .last()
            .ok_or_else(|| LedgerError::InvalidChain("empty chain".to_string()))?;

        if block.index != state.chain.len() as u64 {
            return Err(LedgerError::InvalidBlock(format!(
                "index {} does not follow tip {}",
                block.index, tip.index
            )));
        }
        if block.transactions.is_empty() {
            return Err(LedgerError::InvalidBlock("missing reward transaction".to_string()));
        }
        if !valid_proof(block.transfers(), &block.previous_hash, block.proof, self.difficulty) {
            return Err(LedgerError::InvalidBlock("proof does not meet difficulty".to_string()));
        }
        if tip.hash() != block.previous_hash {
            return Err(LedgerError::InvalidBlock("previous hash does not match tip".to_string()));
        }
        if !valid_reward(&block, self.reward) {
            return Err(LedgerError::InvalidBlock("reward transaction is malformed".to_string()));
        }

        let transfers = block.transfers();
        for (pos, tx) in transfers.iter().enumerate() {
            let earlier = &transfers[..pos];
            if earlier.contains(tx) || is_confirmed(&state.chain, tx) {
                return Err(LedgerError::InvalidBlock(format!(
                    "transaction from {} is already in the chain",
                    tx.sender
                )));
            }
            let available = balance_of(&tx.sender, &state.chain, earlier);
            if !verify_transaction(tx, |_| available) {
                return Err(LedgerError::InvalidBlock(format!(
                    "transaction from {} is not valid",
                    tx.sender
                )));
            }
        }

        state.open_transactions.retain(|pending| !block.transactions.contains(pending));
        info!("Appended block {} from peer", block.index);
        state.chain.push(block);
        Self::prune_unfunded(state);
        self.persist(state);
        Ok(())
    }

    /// Replays the pending pool in order on top of the chain and drops every
    /// entry its sender can no longer cover.
    fn prune_unfunded(state: &mut LedgerState) {
        let pending = std::mem::take(&mut state.open_transactions);
        let mut kept: Vec<Transaction> = Vec::with_capacity(pending.len());

        for tx in pending {
            if balance_of(&tx.sender, &state.chain, &kept) >= tx.amount {
                kept.push(tx);
            } else {
                warn!(
                    "Dropping pending transaction {} -> {} ({}): no longer funded",
                    tx.sender, tx.recipient, tx.amount
                );
            }
        }

        state.open_transactions = kept;
    }

    /// Dispatches a block pushed by a peer according to its index
    pub fn receive_block(&self, block: Block) -> BlockReception {
        let mut state = self.state.write();
        let tip_index = state.chain.last().map(|tip| tip.index).unwrap_or_default();

        if block.index == tip_index + 1 {
            match self.ingest_locked(&mut state, block) {
                Ok(()) => BlockReception::Appended,
                Err(err) => {
                    warn!("Rejected block from peer: {}", err);
                    BlockReception::Rejected(err.to_string())
                }
            }
        } else if block.index > tip_index {
            info!(
                "Peer block {} is ahead of local tip {}, resolution required",
                block.index, tip_index
            );
            state.needs_resolution = true;
            BlockReception::AheadOfLocal
        } else {
            BlockReception::Stale
        }
    }

    fn acceptable_chain(&self, chain: &[Block]) -> bool {
        !chain.is_empty() && verify_chain(chain, self.difficulty) && valid_rewards(chain, self.reward)
    }

    /// Adopts the longest valid chain offered by any peer.
    ///
    /// A peer chain must be strictly longer than the best seen so far and
    /// valid in its own right. Returns whether the local chain was replaced.
    pub async fn resolve_conflicts(&self) -> bool {
        let peers = self.peers();
        let fetched = join_all(peers.iter().map(|peer| self.broadcaster.fetch_chain(peer))).await;

        let mut state = self.state.write();
        let mut winner: Option<(&String, Vec<Block>)> = None;
        let mut best_length = state.chain.len();

        for (peer, result) in peers.iter().zip(fetched) {
            let candidate = match result {
                Ok(chain) => chain,
                Err(err) => {
                    warn!("Skipping peer during resolution: {}", err);
                    continue;
                }
            };

            if candidate.len() <= best_length {
                continue;
            }
            if !self.acceptable_chain(&candidate) {
                warn!("Peer {} offered a longer but invalid chain", peer);
                continue;
            }

            best_length = candidate.len();
            winner = Some((peer, candidate));
        }

        let replaced = match winner {
            Some((peer, chain)) => {
                info!("Replacing local chain with {} blocks from {}", chain.len(), peer);
                state.chain = chain;
                state.open_transactions.clear();
                true
            }
            None => false,
        };

        state.needs_resolution = false;
        self.persist(&state);
        replaced
    }

    pub fn add_peer(&self, address: &str) -> Vec<String> {
        let mut state = self.state.write();
        if state.peer_nodes.insert(address.to_string()) {
            info!("Added peer {}", address);
        }
        self.persist(&state);
        state.peer_nodes.iter().cloned().collect()
    }

    pub fn remove_peer(&self, address: &str) -> Vec<String> {
        let mut state = self.state.write();
        if state.peer_nodes.remove(address) {
            info!("Removed peer {}", address);
        }
        self.persist(&state);
        state.peer_nodes.iter().cloned().collect()
    }
}
