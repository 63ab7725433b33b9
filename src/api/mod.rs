// API module
//
// HTTP surface of the node, used by wallets and by peers

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;
