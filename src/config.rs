use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

/// Hex digests are 64 characters long; no difficulty beyond that can be met
pub const MAX_DIFFICULTY: usize = 64;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Difficulty {0} exceeds the maximum of 64")]
    DifficultyTooHigh(usize),

    #[error("Mining reward must be a finite, non-negative number, got {0}")]
    InvalidReward(f64),
}

/// Node settings. Every flag can also come from the environment or a `.env` file.
#[derive(Debug, Clone, Parser)]
#[command(name = "pow_ledger", version, about = "Proof-of-work ledger node")]
pub struct NodeConfig {
    /// Interface the HTTP server binds to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port the HTTP server listens on
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Leading zero characters a proof digest needs
    #[arg(long, env = "DIFFICULTY", default_value_t = 2)]
    pub difficulty: usize,

    /// Amount paid to the miner of each block. Every node on a network must
    /// use the same value; a stored chain mined with another reward is refused
    /// at startup.
    #[arg(long, env = "MINING_REWARD", default_value_t = 10.0)]
    pub reward: f64,

    /// Directory for the chain database and wallet file [default: data/node-<port>]
    #[arg(long, env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Per-request timeout for peer calls
    #[arg(long, env = "PEER_TIMEOUT_SECS", default_value_t = 5)]
    pub peer_timeout_secs: u64,
}

impl NodeConfig {
    /// Reads `.env` (if any), then the command line and environment
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        let config = NodeConfig::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::DifficultyTooHigh(self.difficulty));
        }
        if !self.reward.is_finite() || self.reward < 0.0 {
            return Err(ConfigError::InvalidReward(self.reward));
        }
        Ok(())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data/node-{}", self.port)))
    }

    pub fn chain_path(&self) -> PathBuf {
        self.data_dir().join("chain")
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.data_dir().join("wallet.txt")
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTINGS_ENV: [&str; 6] = ["HOST", "PORT", "DIFFICULTY", "MINING_REWARD", "DATA_DIR", "PEER_TIMEOUT_SECS"];

    #[test]
    fn test_defaults() {
        // Defaults only apply when nothing comes from the environment
        for key in SETTINGS_ENV {
            std::env::remove_var(key);
        }

        let config = NodeConfig::try_parse_from(["pow_ledger"]).unwrap();

        assert_eq!(config.port, 5000);
        assert_eq!(config.difficulty, 2);
        assert_eq!(config.reward, 10.0);
        assert_eq!(config.data_dir(), PathBuf::from("data/node-5000"));
        assert_eq!(config.wallet_path(), PathBuf::from("data/node-5000/wallet.txt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = NodeConfig::try_parse_from([
            "pow_ledger",
            "--port",
            "5001",
            "--difficulty",
            "3",
            "--data-dir",
            "/tmp/ledger",
        ])
        .unwrap();

        assert_eq!(config.port, 5001);
        assert_eq!(config.difficulty, 3);
        assert_eq!(config.chain_path(), PathBuf::from("/tmp/ledger/chain"));
    }

    #[test]
    fn test_validation() {
        let mut config = NodeConfig::try_parse_from(["pow_ledger"]).unwrap();

        config.difficulty = 65;
        assert_eq!(config.validate(), Err(ConfigError::DifficultyTooHigh(65)));

        config.difficulty = 2;
        config.reward = -1.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidReward(-1.0)));
    }
}
