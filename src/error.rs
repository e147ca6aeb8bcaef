//! Error types for Tallychain

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid peer address: {0}")]
    InvalidPeerAddress(String),
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),
    #[error("Invalid chain: {0}")]
    InvalidChain(String),
    #[error("Stale mine: chain head advanced while searching for a proof")]
    StaleMine,
    #[error("Mining cancelled")]
    MiningCancelled,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        ChainError::PeerUnreachable(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
