use thiserror::Error;

/// Failures of the chain-facing components.
#[derive(Debug, Error)]
pub enum ChainError {
    /// The endpoint URL is malformed, the endpoint did not answer, or the connection is closed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transport failure or timeout on an otherwise open connection.
    #[error("Network error: {0}")]
    Network(String),

    #[error("Block {0} not found")]
    NotFound(u64),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    /// The node refused the transaction (balance, gas, nonce, ...). Carries the node's message.
    #[error("Transaction rejected: {0}")]
    Submission(String),

    /// Transfer parameters outside what the network can accept.
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Chain ID mismatch: expected {expected}, got {actual}")]
    ChainMismatch { expected: u64, actual: u64 },
}

/// What a top-level caller should do with a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; a fresh attempt may succeed.
    Retry,
    /// Retrying with the same inputs cannot succeed.
    Abort,
    /// The network made a decision the user has to see.
    Surface,
}

impl ChainError {
    pub fn disposition(&self) -> Disposition {
        match self {
            ChainError::Network(_) => Disposition::Retry,
            ChainError::Submission(_) => Disposition::Surface,
            ChainError::Connection(_)
            | ChainError::NotFound(_)
            | ChainError::InvalidKey(_)
            | ChainError::Signing(_)
            | ChainError::InvalidTransfer(_)
            | ChainError::ChainMismatch { .. } => Disposition::Abort,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == Disposition::Retry
    }
}

pub type ChainResult<T> = Result<T, ChainError>;
