//! Error types for the sync pipeline

use billsync_common::BillsyncError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures talking to the billing portal
#[derive(Error, Debug)]
pub enum PortalError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Portal returned {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Context switch to designation {designation_id} failed: {reason}")]
    Designation { designation_id: i64, reason: String },

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl PortalError {
    /// Timeouts, connection resets, 5xx and throttling are worth another attempt
    pub fn is_transient(&self) -> bool {
        match self {
            PortalError::Http(e) => {
                if e.is_decode() || e.is_builder() {
                    return false;
                }
                match e.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => true,
                }
            },
            PortalError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            },
            PortalError::Auth(_) | PortalError::Designation { .. } | PortalError::Url(_) => false,
        }
    }
}

/// Pipeline error
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Portal(#[from] PortalError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Common(#[from] BillsyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {page} of {collection} could not be fetched")]
    FetchFailed { collection: String, page: u32 },

    #[error("Store rejected write: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl IngestError {
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Portal(e) => e.is_transient(),
            IngestError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Protocol(_)
            ),
            IngestError::Store(_) => true,
            _ => false,
        }
    }
}
