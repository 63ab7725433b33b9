use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use log::info;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Sender used by reward transactions. Never a valid public key.
pub const MINING_SENDER: &str = "MINING";

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Decoding error: {0}")]
    DecodingError(String),

    #[error("Key file error: {0}")]
    KeyFile(#[from] io::Error),
}

/// An account identity: the hex-encoded Ed25519 public key, or the mining sentinel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    /// Creates an address from a public key
    pub fn from_public_key(public_key: &VerifyingKey) -> Self {
        Address(hex::encode(public_key.as_bytes()))
    }

    /// The sender of every reward transaction
    pub fn mining() -> Self {
        Address(MINING_SENDER.to_string())
    }

    pub fn is_mining(&self) -> bool {
        self.0 == MINING_SENDER
    }

    /// Decodes the address back into a public key
    pub fn to_public_key(&self) -> Result<VerifyingKey, CryptoError> {
        let bytes = hex::decode(&self.0).map_err(|e| CryptoError::DecodingError(e.to_string()))?;

        let bytes: [u8; 32] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidPublicKey("Invalid public key length".to_string())
        })?;

        VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// A hex-encoded Ed25519 signature. Empty for reward transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct DigitalSignature(pub String);

impl DigitalSignature {
    pub fn from_signature(signature: &Signature) -> Self {
        DigitalSignature(hex::encode(signature.to_bytes()))
    }

    pub fn to_signature(&self) -> Option<Signature> {
        let bytes: [u8; 64] = hex::decode(&self.0).ok()?.try_into().ok()?;
        Some(Signature::from_bytes(&bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// SHA-256 over the UTF-8 concatenation of the three displayed fields.
/// This is the message every transfer signature covers.
pub fn signing_digest(sender: &Address, recipient: &Address, amount: f64) -> [u8; 32] {
    let payload = format!("{}{}{}", sender, recipient, amount);
    Sha256::digest(payload.as_bytes()).into()
}

/// Checks `signature` over the transfer against the key encoded in `sender`.
///
/// Fails closed: malformed key material or a malformed signature yields
/// `false` rather than an error.
pub fn verify(sender: &Address, recipient: &Address, amount: f64, signature: &DigitalSignature) -> bool {
    let Ok(public_key) = sender.to_public_key() else {
        return false;
    };
    let Some(signature) = signature.to_signature() else {
        return false;
    };

    let digest = signing_digest(sender, recipient, amount);
    public_key.verify(&digest, &signature).is_ok()
}

/// Represents a wallet with a keypair
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

impl Wallet {
    /// Generates a fresh keypair. The public key doubles as the account identity.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Wallet {
            signing_key,
            address,
        }
    }

    /// Creates a wallet from an existing secret key
    pub fn from_secret_key(secret_key_bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_array: [u8; 32] = secret_key_bytes.try_into().map_err(|_| {
            CryptoError::InvalidPrivateKey("Invalid private key length".to_string())
        })?;

        let signing_key = SigningKey::from_bytes(&bytes_array);
        let address = Address::from_public_key(&signing_key.verifying_key());

        Ok(Wallet {
            signing_key,
            address,
        })
    }

    /// Loads the node wallet from `path`, generating and writing a new one if
    /// the file does not exist yet.
    ///
    /// The file holds the hex public key on the first line and the hex
    /// private key on the second.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, CryptoError> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(contents) => Self::from_key_file(&contents),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let wallet = Self::generate();
                wallet.save(path)?;
                info!("Generated new wallet {} at {}", wallet.address(), path.display());
                Ok(wallet)
            }
            Err(err) => Err(CryptoError::KeyFile(err)),
        }
    }

    fn from_key_file(contents: &str) -> Result<Self, CryptoError> {
        let mut lines = contents.lines();
        let (Some(public_hex), Some(private_hex)) = (lines.next(), lines.next()) else {
            return Err(CryptoError::DecodingError("Key file must hold two lines".to_string()));
        };

        let secret = hex::decode(private_hex.trim())
            .map_err(|e| CryptoError::DecodingError(e.to_string()))?;
        let wallet = Self::from_secret_key(&secret)?;

        if wallet.address.0 != public_hex.trim() {
            return Err(CryptoError::InvalidPublicKey(
                "Stored public key does not match the private key".to_string(),
            ));
        }

        Ok(wallet)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), CryptoError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, format!("{}\n{}", self.address, self.secret_key_hex()))?;
        Ok(())
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Signs a transfer of `amount` from `sender` to `recipient`
    pub fn sign(&self, sender: &Address, recipient: &Address, amount: f64) -> DigitalSignature {
        let digest = signing_digest(sender, recipient, amount);
        DigitalSignature::from_signature(&self.signing_key.sign(&digest))
    }

    /// Exports the wallet's secret key as hex
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_creation() {
        let wallet = Wallet::generate();
        assert_eq!(wallet.address().0.len(), 64);
        assert!(!wallet.address().is_mining());
    }

    #[test]
    fn test_signing_and_verification() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();

        let signature = alice.sign(alice.address(), bob.address(), 10.0);
        assert!(verify(alice.address(), bob.address(), 10.0, &signature));

        // Different amount
        assert!(!verify(alice.address(), bob.address(), 11.0, &signature));

        // Claimed by someone else
        assert!(!verify(bob.address(), bob.address(), 10.0, &signature));
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let alice = Wallet::generate();
        let bob = Wallet::generate();

        let signature = alice.sign(alice.address(), bob.address(), 10.0);
        let mut bytes = hex::decode(&signature.0).unwrap();
        bytes[0] ^= 0x01;
        let tampered = DigitalSignature(hex::encode(bytes));

        assert!(!verify(alice.address(), bob.address(), 10.0, &tampered));
    }

    #[test]
    fn test_garbage_key_material_fails_closed() {
        let bob = Wallet::generate();
        let signature = DigitalSignature("00".repeat(64));

        assert!(!verify(&Address::from("not-hex"), bob.address(), 1.0, &signature));
        assert!(!verify(&Address::from("abcd"), bob.address(), 1.0, &signature));
        assert!(!verify(&Address::mining(), bob.address(), 1.0, &signature));
        assert!(!verify(bob.address(), bob.address(), 1.0, &DigitalSignature("zz".to_string())));
        assert!(!verify(bob.address(), bob.address(), 1.0, &DigitalSignature::default()));
    }

    #[test]
    fn test_address_conversion() {
        let wallet = Wallet::generate();
        let public_key = wallet.address().to_public_key().unwrap();
        assert_eq!(Address::from_public_key(&public_key), *wallet.address());
    }

    #[test]
    fn test_wallet_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("pow-ledger-wallet-{}", std::process::id()));
        let path = dir.join("wallet.txt");
        let _ = fs::remove_file(&path);

        let created = Wallet::load_or_create(&path).unwrap();
        let loaded = Wallet::load_or_create(&path).unwrap();
        assert_eq!(created.address(), loaded.address());
        assert_eq!(created.secret_key_hex(), loaded.secret_key_hex());

        fs::write(&path, format!("{}\n{}", Wallet::generate().address(), created.secret_key_hex())).unwrap();
        assert!(Wallet::load_or_create(&path).is_err());

        let _ = fs::remove_dir_all(&dir);
    }
}
