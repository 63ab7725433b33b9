use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Block, BlockReception, Ledger, LedgerError, Origin, Transaction, Wallet};

/// Shared ledger handle
pub type LedgerData = web::Data<Ledger>;

/// This node's wallet
pub type WalletData = web::Data<Wallet>;

/// Response for the wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The node's public key (its identity)
    pub public_key: String,

    /// Current balance including pending transactions
    pub funds: f64,
}

/// Response for the new wallet endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct NewWalletResponse {
    pub public_key: String,

    /// The private key (hex encoded). The node does not keep it.
    pub private_key: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub identity: String,
    pub balance: f64,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's public key
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,
    pub transaction: Transaction,

    /// Balance of this node afterwards
    pub funds: f64,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,

    pub funds: f64,
}

/// A block pushed by a peer
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BroadcastBlockRequest {
    pub block: Block,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodeRequest {
    /// Peer address as `host:port`
    pub node: String,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct NodesResponse {
    pub message: String,
    pub all_nodes: Vec<String>,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,
    pub replaced: bool,
}

fn error_response(err: &LedgerError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        LedgerError::ResolutionRequired => HttpResponse::Conflict().json(body),
        LedgerError::ReservedSender
        | LedgerError::InvalidAmount(_)
        | LedgerError::DuplicateTransaction
        | LedgerError::InvalidSignature
        | LedgerError::InsufficientFunds { .. }
        | LedgerError::InvalidBlock(_) => HttpResponse::BadRequest().json(body),
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Get this node's wallet
#[utoipa::path(
    get,
    path = "/api/v1/wallet",
    responses(
        (status = 200, description = "Node identity and funds", body = WalletResponse)
    )
)]
pub async fn get_wallet(ledger: LedgerData, wallet: WalletData) -> impl Responder {
    HttpResponse::Ok().json(WalletResponse {
        public_key: wallet.address().0.clone(),
        funds: ledger.get_balance(None),
    })
}

/// Create a new keypair
///
/// The private key must be stored by the caller
#[utoipa::path(
    post,
    path = "/api/v1/wallet/new",
    responses(
        (status = 201, description = "Keypair generated", body = NewWalletResponse)
    )
)]
pub async fn create_wallet() -> impl Responder {
    let wallet = Wallet::generate();

    HttpResponse::Created().json(NewWalletResponse {
        public_key: wallet.address().0.clone(),
        private_key: wallet.secret_key_hex(),
    })
}

/// Get this node's balance
#[utoipa::path(
    get,
    path = "/api/v1/balance",
    responses(
        (status = 200, description = "Balance retrieved", body = BalanceResponse)
    )
)]
pub async fn get_own_balance(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(BalanceResponse {
        identity: ledger.identity().0.clone(),
        balance: ledger.get_balance(None),
    })
}

/// Get the balance of any identity
#[utoipa::path(
    get,
    path = "/api/v1/balance/{identity}",
    params(
        ("identity" = String, Path, description = "Hex public key")
    ),
    responses(
        (status = 200, description = "Balance retrieved", body = BalanceResponse)
    )
)]
pub async fn get_balance(ledger: LedgerData, identity: web::Path<String>) -> impl Responder {
    let identity = Address(identity.into_inner());
    let balance = ledger.get_balance(Some(&identity));

    HttpResponse::Ok().json(BalanceResponse {
        identity: identity.0,
        balance,
    })
}

/// Send funds from this node's wallet
#[utoipa::path(
    post,
    path = "/api/v1/transaction",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction queued", body = TransactionResponse),
        (status = 400, description = "Invalid or unaffordable transaction")
    )
)]
pub async fn new_transaction(
    ledger: LedgerData,
    wallet: WalletData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = request.into_inner();
    let transaction = Transaction::signed(&wallet, Address(request.recipient), request.amount);

    match ledger.submit_transaction(transaction, Origin::Local).await {
        Ok(transaction) => HttpResponse::Created().json(TransactionResponse {
            message: "Successfully added transaction.".to_string(),
            transaction,
            funds: ledger.get_balance(None),
        }),
        Err(err) => {
            warn!("Creating a transaction failed: {}", err);
            error_response(&err)
        }
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions plus this node's reward
#[utoipa::path(
    post,
    path = "/api/v1/mine",
    responses(
        (status = 201, description = "Block mined", body = MineResponse),
        (status = 409, description = "Conflicts must be resolved first"),
        (status = 500, description = "Mining failed")
    )
)]
pub async fn mine_block(ledger: LedgerData) -> impl Responder {
    match ledger.mine().await {
        Ok(block) => HttpResponse::Created().json(MineResponse {
            message: "Block mined successfully".to_string(),
            block,
            funds: ledger.get_balance(None),
        }),
        Err(err) => {
            warn!("Mining failed: {}", err);
            error_response(&err)
        }
    }
}

/// Get the full chain
#[utoipa::path(
    get,
    path = "/api/v1/chain",
    responses(
        (status = 200, description = "Chain retrieved", body = Vec<Block>)
    )
)]
pub async fn get_chain(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.chain())
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/api/v1/transactions",
    responses(
        (status = 200, description = "Pending transactions retrieved", body = Vec<Transaction>)
    )
)]
pub async fn get_open_transactions(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(ledger.open_transactions())
}

/// Accept a transaction relayed by a peer
#[utoipa::path(
    post,
    path = "/api/v1/broadcast-transaction",
    request_body = Transaction,
    responses(
        (status = 201, description = "Transaction accepted", body = TransactionResponse),
        (status = 400, description = "Transaction rejected")
    )
)]
pub async fn broadcast_transaction(ledger: LedgerData, transaction: web::Json<Transaction>) -> impl Responder {
    match ledger.submit_transaction(transaction.into_inner(), Origin::Peer).await {
        Ok(transaction) => HttpResponse::Created().json(TransactionResponse {
            message: "Transaction broadcast.".to_string(),
            transaction,
            funds: ledger.get_balance(None),
        }),
        Err(err) => {
            warn!("Broadcast transaction rejected: {}", err);
            error_response(&err)
        }
    }
}

/// Accept a block pushed by a peer
#[utoipa::path(
    post,
    path = "/api/v1/broadcast-block",
    request_body = BroadcastBlockRequest,
    responses(
        (status = 201, description = "Block appended", body = MessageResponse),
        (status = 200, description = "Peer is ahead; resolution required", body = MessageResponse),
        (status = 409, description = "Block rejected or stale", body = MessageResponse)
    )
)]
pub async fn broadcast_block(ledger: LedgerData, request: web::Json<BroadcastBlockRequest>) -> impl Responder {
    let message = |text: &str| MessageResponse {
        message: text.to_string(),
    };

    match ledger.receive_block(request.into_inner().block) {
        BlockReception::Appended => HttpResponse::Created().json(message("Block added")),
        BlockReception::Rejected(reason) => {
            HttpResponse::Conflict().json(message(&format!("Received block was rejected: {}", reason)))
        }
        BlockReception::AheadOfLocal => {
            HttpResponse::Ok().json(message("Blockchain seems to differ from local blockchain"))
        }
        BlockReception::Stale => {
            HttpResponse::Conflict().json(message("Blockchain seems to be shorter, block not added"))
        }
    }
}

/// Register a peer
#[utoipa::path(
    post,
    path = "/api/v1/node",
    request_body = NodeRequest,
    responses(
        (status = 201, description = "Peer added", body = NodesResponse),
        (status = 400, description = "No node given")
    )
)]
pub async fn add_node(ledger: LedgerData, request: web::Json<NodeRequest>) -> impl Responder {
    let node = request.node.trim();
    if node.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({ "error": "No node data found." }));
    }

    HttpResponse::Created().json(NodesResponse {
        message: "Node added successfully".to_string(),
        all_nodes: ledger.add_peer(node),
    })
}

/// Forget a peer
#[utoipa::path(
    delete,
    path = "/api/v1/node/{node}",
    params(
        ("node" = String, Path, description = "Peer address as host:port")
    ),
    responses(
        (status = 200, description = "Peer removed", body = NodesResponse)
    )
)]
pub async fn remove_node(ledger: LedgerData, node: web::Path<String>) -> impl Responder {
    HttpResponse::Ok().json(NodesResponse {
        message: "Node removed successfully".to_string(),
        all_nodes: ledger.remove_peer(&node),
    })
}

/// List known peers
#[utoipa::path(
    get,
    path = "/api/v1/nodes",
    responses(
        (status = 200, description = "Peers retrieved", body = NodesResponse)
    )
)]
pub async fn get_nodes(ledger: LedgerData) -> impl Responder {
    HttpResponse::Ok().json(NodesResponse {
        message: "Successfully retrieved nodes".to_string(),
        all_nodes: ledger.peers(),
    })
}

/// Adopt the longest valid chain among peers
#[utoipa::path(
    post,
    path = "/api/v1/resolve-conflicts",
    responses(
        (status = 200, description = "Resolution finished", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(ledger: LedgerData) -> impl Responder {
    let replaced = ledger.resolve_conflicts().await;
    let message = if replaced {
        "Chain was replaced."
    } else {
        "Chain was not replaced."
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_routes;
    use crate::blockchain::{verification, HttpBroadcaster, MemoryStore};
    use actix_web::{http::StatusCode, test, App};
    use std::sync::Arc;
    use std::time::Duration;

    fn node() -> (LedgerData, WalletData) {
        let wallet = Wallet::generate();
        let ledger = Ledger::open(
            2,
            10.0,
            wallet.address().clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(HttpBroadcaster::new(Duration::from_secs(1)).unwrap()),
        )
        .unwrap();
        (web::Data::new(ledger), web::Data::new(wallet))
    }

    /// A valid block `index` that does not link to anything local
    fn unlinked_block(index: u64) -> Block {
        let previous_hash = "ab".repeat(32);
        let proof = verification::proof_of_work(&[], &previous_hash, 2);
        let reward = Transaction::reward(Address::from("someone"), 10.0);
        Block::new(index, previous_hash, vec![reward], proof)
    }

    #[actix_web::test]
    async fn test_mine_and_spend() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/v1/mine").to_request();
        let resp: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.block.index, 1);
        assert_eq!(resp.funds, 10.0);

        let recipient = Wallet::generate();
        let req = test::TestRequest::post()
            .uri("/api/v1/transaction")
            .set_json(TransactionRequest {
                recipient: recipient.address().0.clone(),
                amount: 2.5,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/balance/{}", recipient.address()))
            .to_request();
        let resp: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.balance, 2.5);

        let req = test::TestRequest::get().uri("/api/v1/transactions").to_request();
        let pending: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending.len(), 1);

        let req = test::TestRequest::get().uri("/api/v1/chain").to_request();
        let chain: Vec<Block> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.len(), 2);
    }

    #[actix_web::test]
    async fn test_overspend_is_client_error() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/transaction")
            .set_json(TransactionRequest {
                recipient: Wallet::generate().address().0.clone(),
                amount: 1.0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(ledger.open_transactions().is_empty());
    }

    #[actix_web::test]
    async fn test_malformed_input_is_rejected() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/broadcast-transaction")
            .set_json(serde_json::json!({ "sender": "a", "recipient": "b", "amount": 1.0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());

        let req = test::TestRequest::post()
            .uri("/api/v1/broadcast-transaction")
            .set_json(Transaction::reward(Address::from("thief"), 5.0))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/node")
            .set_json(serde_json::json!({ "node": "  " }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_broadcast_block_dispatch() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        // Next index but not linked to our genesis
        let req = test::TestRequest::post()
            .uri("/api/v1/broadcast-block")
            .set_json(BroadcastBlockRequest { block: unlinked_block(1) })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert!(!ledger.needs_resolution());

        let req = test::TestRequest::post()
            .uri("/api/v1/broadcast-block")
            .set_json(BroadcastBlockRequest { block: Block::genesis() })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::post()
            .uri("/api/v1/broadcast-block")
            .set_json(BroadcastBlockRequest { block: unlinked_block(5) })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(ledger.needs_resolution());

        let req = test::TestRequest::post().uri("/api/v1/mine").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        // No peers: nothing replaces the chain, but the flag clears
        let req = test::TestRequest::post().uri("/api/v1/resolve-conflicts").to_request();
        let resp: ResolveResponse = test::call_and_read_body_json(&app, req).await;
        assert!(!resp.replaced);

        let req = test::TestRequest::post().uri("/api/v1/mine").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[actix_web::test]
    async fn test_peer_management() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/node")
            .set_json(NodeRequest {
                node: "localhost:5001".to_string(),
            })
            .to_request();
        let resp: NodesResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.all_nodes, vec!["localhost:5001".to_string()]);

        let req = test::TestRequest::get().uri("/api/v1/nodes").to_request();
        let resp: NodesResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.all_nodes.len(), 1);

        let req = test::TestRequest::delete().uri("/api/v1/node/localhost:5001").to_request();
        let resp: NodesResponse = test::call_and_read_body_json(&app, req).await;
        assert!(resp.all_nodes.is_empty());
    }

    #[actix_web::test]
    async fn test_wallet_endpoints() {
        let (ledger, wallet) = node();
        let app = test::init_service(
            App::new()
                .app_data(ledger.clone())
                .app_data(wallet.clone())
                .configure(configure_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/wallet").to_request();
        let resp: WalletResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.public_key, wallet.address().0);
        assert_eq!(resp.funds, 0.0);

        let req = test::TestRequest::post().uri("/api/v1/wallet/new").to_request();
        let resp: NewWalletResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.public_key.len(), 64);
        assert_eq!(resp.private_key.len(), 64);

        let req = test::TestRequest::get().uri("/api/v1/balance").to_request();
        let resp: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.identity, wallet.address().0);
    }
}
