//! Error types for the vitals-store crate.

use thiserror::Error;

/// Errors that can occur in the point registry and hot store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A row with the same `(point_id, timestamp)` already exists.
    #[error("uniqueness conflict: {0}")]
    Conflict(String),

    /// A write targeted a partition that has already been compressed.
    #[error("partition starting at {partition_start} is compressed and immutable")]
    ImmutablePartition {
        /// Start of the compressed partition, in milliseconds.
        partition_start: i64,
    },

    /// The time range is invalid (start > end).
    #[error("invalid time range: start={start}, end={end}")]
    InvalidTimeRange {
        /// Start timestamp.
        start: i64,
        /// End timestamp.
        end: i64,
    },

    /// A point name was rejected.
    #[error("invalid point name: {0}")]
    InvalidPointName(String),

    /// An archive run with the given id does not exist.
    #[error("archive run not found: {0}")]
    RunNotFound(i64),

    /// The store cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Encoding or decoding a compressed partition failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The underlying database reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns true if this error is a uniqueness conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
