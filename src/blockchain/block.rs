use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use super::hashing;
use super::transaction::Transaction;

/// Proof carried by the genesis block
pub const GENESIS_PROOF: u64 = 100;

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Index of the block in the chain
    pub index: u64,

    /// Digest of the previous block, empty for genesis
    pub previous_hash: String,

    /// Transfers followed by the miner's reward
    pub transactions: Vec<Transaction>,

    /// Proof of work (nonce)
    pub proof: u64,

    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl Block {
    /// Creates a new block stamped with the current time
    pub fn new(index: u64, previous_hash: String, transactions: Vec<Transaction>, proof: u64) -> Self {
        Block {
            index,
            previous_hash,
            transactions,
            proof,
            timestamp: now_seconds(),
        }
    }

    /// The fixed first block every chain starts from
    pub fn genesis() -> Self {
        Block {
            index: 0,
            previous_hash: String::new(),
            transactions: Vec::new(),
            proof: GENESIS_PROOF,
            timestamp: 0.0,
        }
    }

    /// Digest of this block, used as the next block's `previous_hash`
    pub fn hash(&self) -> String {
        hashing::hash_block(self)
    }

    /// The transactions the proof was computed over: everything but the
    /// trailing reward.
    pub fn transfers(&self) -> &[Transaction] {
        match self.transactions.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    pub fn canonical(&self) -> Value {
        let transactions: Vec<Value> = self.transactions.iter().map(Transaction::canonical).collect();

        json!({
            "index": self.index,
            "previous_hash": self.previous_hash,
            "proof": self.proof,
            "timestamp": self.timestamp,
            "transactions": transactions,
        })
    }
}

fn now_seconds() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Address;

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.index, 0);
        assert_eq!(genesis.previous_hash, "");
        assert!(genesis.transactions.is_empty());
        assert_eq!(genesis.proof, GENESIS_PROOF);
        assert_eq!(genesis.timestamp, 0.0);
        assert_eq!(genesis.hash(), Block::genesis().hash());
        assert!(genesis.transfers().is_empty());
    }

    #[test]
    fn test_new_block() {
        let transactions = vec![
            Transaction::reward(Address::from("recipient1"), 10.0),
            Transaction::reward(Address::from("recipient2"), 20.0),
        ];

        let block = Block::new(1, "previous_hash".to_string(), transactions, 100);

        assert_eq!(block.index, 1);
        assert_eq!(block.proof, 100);
        assert_eq!(block.previous_hash, "previous_hash");
        assert!(block.timestamp > 0.0);
        assert_eq!(block.transfers().len(), 1);
        assert_eq!(block.transfers()[0].recipient.0, "recipient1");
    }

    #[test]
    fn test_wire_field_order() {
        let json = serde_json::to_string(&Block::genesis()).unwrap();
        assert_eq!(
            json,
            r#"{"index":0,"previous_hash":"","transactions":[],"proof":100,"timestamp":0.0}"#
        );
    }
}
