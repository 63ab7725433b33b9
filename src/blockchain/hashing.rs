// Canonical hashing
//
// Values are rendered as compact JSON with object keys in sorted order
// (the `canonical` methods list keys alphabetically, and serde_json's default
// map is ordered) and digested with SHA-256.

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::block::Block;
use super::transaction::Transaction;

/// SHA-256 of `bytes` as a lowercase hex string
pub fn hash_string_256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn hash_value(value: &Value) -> String {
    hash_string_256(value.to_string().as_bytes())
}

pub fn hash_block(block: &Block) -> String {
    hash_value(&block.canonical())
}

/// Canonical text of a transaction list, as fed into the proof-of-work digest
pub fn transactions_text(transactions: &[Transaction]) -> String {
    Value::Array(transactions.iter().map(Transaction::canonical).collect()).to_string()
}

/// Digest a proof is judged by: `transactions ‖ last_hash ‖ proof`
pub fn proof_digest(transactions: &[Transaction], last_hash: &str, proof: u64) -> String {
    let message = format!("{}{}{}", transactions_text(transactions), last_hash, proof);
    hash_string_256(message.as_bytes())
}
