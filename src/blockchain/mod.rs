// Blockchain module
//
// This module contains the ledger engine:
// - Block and transaction records
// - Canonical hashing
// - Signing and verification
// - Proof of work and chain validation
// - The ledger state machine
// - Persistence and peer collaborators

pub mod block;
pub mod crypto;
pub mod hashing;
pub mod ledger;
pub mod peers;
pub mod storage;
pub mod transaction;
pub mod verification;

// Re-export main components for easier access
pub use block::Block;
pub use crypto::{Address, Wallet};
pub use ledger::{BlockReception, Ledger, LedgerError, Origin};
pub use peers::HttpBroadcaster;
pub use storage::{MemoryStore, PersistenceStore, SledStore};
pub use transaction::Transaction;
