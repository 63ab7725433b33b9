use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use log::{info, warn};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;

use blockchain::{HttpBroadcaster, Ledger, MemoryStore, PersistenceStore, SledStore, Wallet};
use config::NodeConfig;

// Opens the chain database, falling back to an in-memory store if it cannot be opened
fn open_store(config: &NodeConfig) -> Arc<dyn PersistenceStore> {
    let path = config.chain_path();

    match SledStore::open(&path) {
        Ok(store) => {
            info!("Using chain database at {}", path.display());
            Arc::new(store)
        }
        Err(err) => {
            warn!("Failed to open chain database at {}: {}", path.display(), err);
            warn!("Running with an in-memory store instead");
            Arc::new(MemoryStore::new())
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_wallet,
        api::handlers::create_wallet,
        api::handlers::get_own_balance,
        api::handlers::get_balance,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::get_chain,
        api::handlers::get_open_transactions,
        api::handlers::broadcast_transaction,
        api::handlers::broadcast_block,
        api::handlers::add_node,
        api::handlers::remove_node,
        api::handlers::get_nodes,
        api::handlers::resolve_conflicts
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            api::handlers::WalletResponse,
            api::handlers::NewWalletResponse,
            api::handlers::BalanceResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::BroadcastBlockRequest,
            api::handlers::MessageResponse,
            api::handlers::NodeRequest,
            api::handlers::NodesResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "ledger", description = "Proof-of-work ledger node API")
    ),
    info(
        title = "Ledger Node API",
        version = "0.1.0",
        description = "Wallet, mining and peer endpoints of a proof-of-work ledger node",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = NodeConfig::load().context("invalid configuration")?;

    let wallet = Wallet::load_or_create(config.wallet_path()).context("failed to load node wallet")?;
    info!("Node identity {}", wallet.address());

    let broadcaster = HttpBroadcaster::new(config.peer_timeout()).context("failed to build peer client")?;

    // A stored chain that fails verification stops the node here
    let ledger = Ledger::open(
        config.difficulty,
        config.reward,
        wallet.address().clone(),
        open_store(&config),
        Arc::new(broadcaster),
    )
    .context("refusing to start: obtain a valid chain or clear the data directory")?;

    let ledger = web::Data::new(ledger);
    let wallet = web::Data::new(wallet);

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        // Configure OpenAPI documentation
        let openapi = ApiDoc::openapi();

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(ledger.clone())
            .app_data(wallet.clone())
            // API routes
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone())
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
