use std::collections::BTreeSet;
use std::path::Path;

use log::debug;
use parking_lot::Mutex;
use sled::{Batch, Db, Tree};
use thiserror::Error;

use super::block::Block;
use super::transaction::Transaction;

const PEERS_KEY: &str = "peers";

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Corrupted storage: {0}")]
    Corrupted(String),
}

/// Everything the ledger needs to come back up where it left off
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedState {
    pub chain: Vec<Block>,
    pub open_transactions: Vec<Transaction>,
    pub peers: BTreeSet<String>,
}

/// Durable home of the ledger state. `save` always writes the full state.
pub trait PersistenceStore: Send + Sync {
    fn save(
        &self,
        chain: &[Block],
        open_transactions: &[Transaction],
        peers: &BTreeSet<String>,
    ) -> Result<(), StorageError>;

    /// `Ok(None)` when nothing has been saved yet
    fn load(&self) -> Result<Option<PersistedState>, StorageError>;
}

/// Sled-backed store
pub struct SledStore {
    /// The database instance
    db: Db,

    /// Blocks keyed by big-endian index
    blocks: Tree,

    /// Pending pool keyed by big-endian position
    transactions: Tree,

    /// Peer set and other singletons
    metadata: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore").finish()
    }
}

impl SledStore {
    /// Opens (or creates) the database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::from_db(sled::open(path)?)
    }

    /// A throwaway database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let blocks = db.open_tree("blocks")?;
        let transactions = db.open_tree("transactions")?;
        let metadata = db.open_tree("metadata")?;

        Ok(Self {
            db,
            blocks,
            transactions,
            metadata,
        })
    }

    fn replace_tree<T: serde::Serialize>(tree: &Tree, items: &[T]) -> Result<(), StorageError> {
        let mut batch = Batch::default();
        for key in tree.iter().keys() {
            batch.remove(key?);
        }
        for (position, item) in items.iter().enumerate() {
            let value = bincode::serialize(item)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            batch.insert((position as u64).to_be_bytes().to_vec(), value);
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    fn read_tree<T: serde::de::DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StorageError> {
        tree.iter()
            .values()
            .map(|value| {
                let value = value?;
                bincode::deserialize::<T>(&value)
                    .map_err(|e| StorageError::DeserializationError(e.to_string()))
            })
            .collect()
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl PersistenceStore for SledStore {
    fn save(
        &self,
        chain: &[Block],
        open_transactions: &[Transaction],
        peers: &BTreeSet<String>,
    ) -> Result<(), StorageError> {
        Self::replace_tree(&self.blocks, chain)?;
        Self::replace_tree(&self.transactions, open_transactions)?;

        let peers: Vec<&String> = peers.iter().collect();
        let value = bincode::serialize(&peers)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.metadata.insert(PEERS_KEY, value)?;

        self.flush()?;
        debug!(
            "Saved {} blocks, {} pending transactions, {} peers",
            chain.len(),
            open_transactions.len(),
            peers.len()
        );
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, StorageError> {
        // Keys are big-endian, so iteration order is index order
        let chain: Vec<Block> = Self::read_tree(&self.blocks)?;
        if chain.is_empty() {
            return Ok(None);
        }

        if let Some((position, block)) = chain
            .iter()
            .enumerate()
            .find(|(position, block)| block.index != *position as u64)
        {
            return Err(StorageError::Corrupted(format!(
                "block at position {} has index {}",
                position, block.index
            )));
        }

        let open_transactions = Self::read_tree(&self.transactions)?;

        let peers: Vec<String> = match self.metadata.get(PEERS_KEY)? {
            Some(value) => bincode::deserialize(&value)
                .map_err(|e| StorageError::DeserializationError(e.to_string()))?,
            None => Vec::new(),
        };

        Ok(Some(PersistedState {
            chain,
            open_transactions,
            peers: peers.into_iter().collect(),
        }))
    }
}

/// In-process store, used when no database is available
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `state`, as if a previous run saved it
    pub fn with_state(state: PersistedState) -> Self {
        MemoryStore {
            state: Mutex::new(Some(state)),
        }
    }
}

impl PersistenceStore for MemoryStore {
    fn save(
        &self,
        chain: &[Block],
        open_transactions: &[Transaction],
        peers: &BTreeSet<String>,
    ) -> Result<(), StorageError> {
        *self.state.lock() = Some(PersistedState {
            chain: chain.to_vec(),
            open_transactions: open_transactions.to_vec(),
            peers: peers.clone(),
        });
        Ok(())
    }

    fn load(&self) -> Result<Option<PersistedState>, StorageError> {
        Ok(self.state.lock().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Transaction, Wallet};

    fn sample_state() -> PersistedState {
        let alice = Wallet::generate();
        let bob = Wallet::generate();

        let reward = Transaction::reward(alice.address().clone(), 10.0);
        let block = Block::new(1, Block::genesis().hash(), vec![reward], 42);

        PersistedState {
            chain: vec![Block::genesis(), block],
            open_transactions: vec![Transaction::signed(&alice, bob.address().clone(), 2.5)],
            peers: ["localhost:5001".to_string(), "localhost:5002".to_string()].into(),
        }
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let store = SledStore::temporary().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(MemoryStore::new().load().unwrap().is_none());
    }

    #[test]
    fn test_sled_round_trip() {
        let store = SledStore::temporary().unwrap();
        let state = sample_state();

        store.save(&state.chain, &state.open_transactions, &state.peers).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }

    #[test]
    fn test_sled_save_replaces_previous_state() {
        let store = SledStore::temporary().unwrap();
        let state = sample_state();
        store.save(&state.chain, &state.open_transactions, &state.peers).unwrap();

        let shorter = vec![Block::genesis()];
        store.save(&shorter, &[], &BTreeSet::new()).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.chain, shorter);
        assert!(loaded.open_transactions.is_empty());
        assert!(loaded.peers.is_empty());
    }

    #[test]
    fn test_memory_round_trip() {
        let store = MemoryStore::new();
        let state = sample_state();

        store.save(&state.chain, &state.open_transactions, &state.peers).unwrap();
        assert_eq!(store.load().unwrap(), Some(state));
    }
}
