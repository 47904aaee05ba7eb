//! Error taxonomy for the data-finance ingestion pipeline
//!
//! Defines the kinds of validation / network / timeout / integrity /
//! permission / disk-full / corrupted-zip / extraction errors, plus a
//! crate-wide `Result` alias. The binary entry point wraps this type in
//! `anyhow::Result` at the outermost layer; within the library, callers
//! (the Retry Strategy, the orchestrators) branch on *kind* rather than
//! on message text.

use thiserror::Error;

/// Core error kinds surfaced by the ingestion pipeline.
#[derive(Error, Debug)]
pub enum DataFinanceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("permission error: {0}")]
    Permission(String),

    #[error("disk full: {0}")]
    DiskFull(String),

    #[error("corrupted zip: {0}")]
    CorruptedZip(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

impl DataFinanceError {
    /// Mirrors the Retry Strategy's `is_retryable` classification,
    /// restricted to the kinds that carry their own verdict regardless of
    /// message content. `None` means the message text must be inspected.
    pub fn is_retryable_kind(&self) -> Option<bool> {
        match self {
            DataFinanceError::Network(_)
            | DataFinanceError::Timeout(_)
            | DataFinanceError::Integrity(_) => Some(true),
            DataFinanceError::Permission(_)
            | DataFinanceError::DiskFull(_)
            | DataFinanceError::Validation(_)
            | DataFinanceError::CorruptedZip(_) => Some(false),
            DataFinanceError::Extraction(_) | DataFinanceError::Io(_) => None,
        }
    }
}

/// Result type alias for the ingestion pipeline.
pub type Result<T> = std::result::Result<T, DataFinanceError>;
