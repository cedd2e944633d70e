//! Error types for the Veritas ledger.

use thiserror::Error;

/// Top-level error type for ledger operations.
///
/// Everything except `Persistence` is raised before a block is built, so a
/// rejected transaction never leaves a trace in the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("user already registered: {0}")]
    DuplicateRegistration(String),

    #[error("sender is not registered: {0}")]
    UnregisteredSender(String),

    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u64, required: u64 },

    #[error("content rejected by admission gate: entropy {entropy:.4}, std dev {std_dev:.4}")]
    ContentRejected { entropy: f64, std_dev: f64 },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("{user} already voted on {content}")]
    AlreadyVoted { user: String, content: String },

    #[error("voting closed for content {0}")]
    VotingClosed(String),

    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("block {index} does not link to its predecessor")]
    BrokenChain { index: usize },

    #[error("block {index} hash does not match its contents")]
    HashMismatch { index: usize },

    #[error("first block is not a valid genesis block")]
    InvalidGenesis,

    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("ledger lock poisoned")]
    LockPoisoned,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

/// Result type alias using ChainError.
pub type Result<T> = std::result::Result<T, ChainError>;
