// Verification rules
//
// Stateless checks shared by the ledger, chain loading and conflict
// resolution: proof validity, transaction validity against a balance
// function, and whole-chain validity.

use super::block::Block;
use super::crypto::Address;
use super::hashing::proof_digest;
use super::transaction::Transaction;

/// True if the proof digest starts with `difficulty` zero characters.
/// `transactions` must not include the reward.
pub fn valid_proof(transactions: &[Transaction], last_hash: &str, proof: u64, difficulty: usize) -> bool {
    let hash = proof_digest(transactions, last_hash, proof);
    hash.len() >= difficulty && hash.bytes().take(difficulty).all(|b| b == b'0')
}

/// Smallest proof, scanning up from zero, that satisfies [`valid_proof`]
pub fn proof_of_work(transactions: &[Transaction], last_hash: &str, difficulty: usize) -> u64 {
    let mut proof = 0;
    while !valid_proof(transactions, last_hash, proof, difficulty) {
        proof += 1;
    }
    proof
}

/// Net amount `who` holds after `blocks`, followed by `pending`
pub fn balance_of(who: &Address, blocks: &[Block], pending: &[Transaction]) -> f64 {
    let confirmed = blocks.iter().flat_map(|block| block.transactions.iter());

    confirmed.chain(pending.iter()).fold(0.0, |balance, tx| {
        let mut balance = balance;
        if tx.recipient == *who {
            balance += tx.amount;
        }
        if tx.sender == *who {
            balance -= tx.amount;
        }
        balance
    })
}

/// True if `tx` already appears in one of `blocks`
pub fn is_confirmed(blocks: &[Block], tx: &Transaction) -> bool {
    blocks.iter().any(|block| block.transactions.contains(tx))
}

/// A transfer is valid when its amount is a positive number the sender can
/// cover and the sender's signature checks out. Reward transactions skip the
/// signature check; they are only ever built by the ledger itself.
pub fn verify_transaction<F>(tx: &Transaction, get_balance: F) -> bool
where
    F: Fn(&Address) -> f64,
{
    if !tx.amount.is_finite() || tx.amount <= 0.0 {
        return false;
    }
    if get_balance(&tx.sender) < tx.amount {
        return false;
    }
    tx.is_reward() || tx.verify_signature()
}

/// Validates every block after genesis: index, linkage to its predecessor,
/// proof over the non-reward transactions, and each non-reward transaction.
/// A transfer repeated anywhere earlier in the chain invalidates it.
///
/// `get_balance(who, prior_blocks, prior_transfers)` is handed the history
/// preceding the transaction under test.
pub fn verify_chain_with<F>(chain: &[Block], difficulty: usize, get_balance: F) -> bool
where
    F: Fn(&Address, &[Block], &[Transaction]) -> f64,
{
    if let Some(first) = chain.first() {
        if *first != Block::genesis() {
            return false;
        }
    }

    for (idx, block) in chain.iter().enumerate().skip(1) {
        let history = &chain[..idx];

        if block.index != idx as u64 {
            return false;
        }
        if block.previous_hash != history[idx - 1].hash() {
            return false;
        }

        let transfers = block.transfers();
        if !valid_proof(transfers, &block.previous_hash, block.proof, difficulty) {
            return false;
        }

        for (pos, tx) in transfers.iter().enumerate() {
            let earlier = &transfers[..pos];
            if earlier.contains(tx) || is_confirmed(history, tx) {
                return false;
            }
            if !verify_transaction(tx, |who| get_balance(who, history, earlier)) {
                return false;
            }
        }
    }

    true
}

/// [`verify_chain_with`] using balances replayed from the chain itself
pub fn verify_chain(chain: &[Block], difficulty: usize) -> bool {
    verify_chain_with(chain, difficulty, balance_of)
}

/// The last entry is a reward of exactly `reward` and no other entry claims
/// to be one.
pub fn valid_reward(block: &Block, reward: f64) -> bool {
    match block.transactions.split_last() {
        Some((last, rest)) => {
            last.is_reward() && last.amount == reward && !rest.iter().any(Transaction::is_reward)
        }
        None => false,
    }
}

pub fn valid_rewards(chain: &[Block], reward: f64) -> bool {
    chain.iter().skip(1).all(|block| valid_reward(block, reward))
}
