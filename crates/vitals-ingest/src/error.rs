//! Error types for the ingestion pipeline.

use thiserror::Error;
use vitals_store::StoreError;

/// Errors that abort an ingestion run.
///
/// Row-level problems (malformed rows, unresolved points, write conflicts)
/// never surface here; they are counted in the run report instead.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The external source could not be reached or answered with an error.
    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    /// No API key is configured for the external source.
    #[error("missing source credentials: {0}")]
    MissingCredentials(String),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The requested window is inverted.
    #[error("invalid window: start={start}, end={end}")]
    InvalidWindow {
        /// Start timestamp.
        start: i64,
        /// End timestamp.
        end: i64,
    },

    /// The persistence task did not finish.
    #[error("persistence task failed: {0}")]
    Task(String),

    /// The hot store failed outside of row-level write isolation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Returns true if retrying on the next tick cannot help without operator action.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingCredentials(_) | Self::InvalidConfig(_))
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;
