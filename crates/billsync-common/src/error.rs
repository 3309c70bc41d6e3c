//! Error types for billsync

use thiserror::Error;

/// Result type alias for billsync operations
pub type Result<T> = std::result::Result<T, BillsyncError>;

/// Error type shared by the workspace crates
#[derive(Error, Debug)]
pub enum BillsyncError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Unknown collection kind: {0}")]
    UnknownKind(String),
}
