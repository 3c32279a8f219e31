//! Error types for the ledger node

use crate::blockchain::Hash;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChainError {
    #[error("Invalid block number: expected {expected}, got {got}")]
    InvalidBlockNumber { expected: u64, got: u64 },

    #[error("Invalid parent hash: expected {expected}, got {got}")]
    InvalidParent { expected: Hash, got: Hash },

    #[error("Invalid proof of work: block hash {0} does not meet the difficulty target")]
    InvalidProofOfWork(Hash),

    #[error("Insufficient balance for tx {tx}: {from} has {balance}, needs {value}")]
    InsufficientBalance {
        tx: String,
        from: String,
        balance: u64,
        value: u64,
    },

    #[error("Balance overflow for tx {tx}: {to} has {balance}, cannot receive {value}")]
    BalanceOverflow {
        tx: String,
        to: String,
        balance: u64,
        value: u64,
    },

    #[error("Block log corrupt at line {line}: {reason}")]
    LogCorrupt { line: usize, reason: String },

    #[error("Mining cancelled")]
    MiningCancelled,

    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl ChainError {
    /// Block or transaction rejected by the ledger rules. Never fatal.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChainError::InvalidBlockNumber { .. }
                | ChainError::InvalidParent { .. }
                | ChainError::InvalidProofOfWork(_)
                | ChainError::InsufficientBalance { .. }
                | ChainError::BalanceOverflow { .. }
        )
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::NetworkError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
