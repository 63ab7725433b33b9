use actix_web::{error, web, HttpResponse};

use super::handlers;

/// Rejects malformed or incomplete JSON bodies with a 400 and an `error` message
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        let body = serde_json::json!({ "error": err.to_string() });
        error::InternalError::from_response(err, HttpResponse::BadRequest().json(body)).into()
    })
}

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .app_data(json_config())
            .route("/wallet", web::get().to(handlers::get_wallet))
            .route("/wallet/new", web::post().to(handlers::create_wallet))
            .route("/balance", web::get().to(handlers::get_own_balance))
            .route("/balance/{identity}", web::get().to(handlers::get_balance))
            .route("/transaction", web::post().to(handlers::new_transaction))
            .route("/transactions", web::get().to(handlers::get_open_transactions))
            .route("/mine", web::post().to(handlers::mine_block))
            .route("/chain", web::get().to(handlers::get_chain))
            .route("/broadcast-transaction", web::post().to(handlers::broadcast_transaction))
            .route("/broadcast-block", web::post().to(handlers::broadcast_block))
            .route("/node", web::post().to(handlers::add_node))
            .route("/node/{node}", web::delete().to(handlers::remove_node))
            .route("/nodes", web::get().to(handlers::get_nodes))
            .route("/resolve-conflicts", web::post().to(handlers::resolve_conflicts))
    );
}
