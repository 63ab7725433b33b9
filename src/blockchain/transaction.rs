use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use super::crypto::{self, Address, DigitalSignature, Wallet};

/// A value transfer. Immutable once constructed; two transactions are the same
/// transaction when all four fields are equal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Hex public key of the payer, or `MINING` for a reward
    #[schema(value_type = String)]
    pub sender: Address,

    /// Hex public key of the payee
    #[schema(value_type = String)]
    pub recipient: Address,

    /// Hex signature over `sender ‖ recipient ‖ amount`, empty for rewards
    #[schema(value_type = String)]
    pub signature: DigitalSignature,

    /// Amount being transferred
    pub amount: f64,
}

impl Transaction {
    pub fn new(sender: Address, recipient: Address, signature: DigitalSignature, amount: f64) -> Self {
        Transaction {
            sender,
            recipient,
            signature,
            amount,
        }
    }

    /// Builds a transfer from the wallet's own address, signed by it
    pub fn signed(wallet: &Wallet, recipient: Address, amount: f64) -> Self {
        let sender = wallet.address().clone();
        let signature = wallet.sign(&sender, &recipient, amount);
        Transaction::new(sender, recipient, signature, amount)
    }

    /// Creates the reward paid to a miner. Carries no signature.
    pub fn reward(recipient: Address, amount: f64) -> Self {
        Transaction::new(Address::mining(), recipient, DigitalSignature::default(), amount)
    }

    pub fn is_reward(&self) -> bool {
        self.sender.is_mining()
    }

    pub fn verify_signature(&self) -> bool {
        crypto::verify(&self.sender, &self.recipient, self.amount, &self.signature)
    }

    /// Field-sorted representation used for hashing and proof-of-work input
    pub fn canonical(&self) -> Value {
        json!({
            "amount": self.amount,
            "recipient": self.recipient.0,
            "sender": self.sender.0,
            "signature": self.signature.0,
        })
    }
}
