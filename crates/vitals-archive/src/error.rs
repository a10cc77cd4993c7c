//! Error types for archival and cold storage.

use thiserror::Error;
use vitals_store::StoreError;

/// Errors from the archival pipeline and the cold store.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// A segment file is unreadable or has an unexpected layout.
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The cold store cannot be reached.
    #[error("cold store unavailable: {0}")]
    Unavailable(String),

    /// Parquet encoding or decoding failed.
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Arrow array construction failed.
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// The hot store or ledger failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for archival operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;
