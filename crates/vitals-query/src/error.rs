//! Error types for the query router.

use thiserror::Error;

/// Machine-readable code for validation failures.
pub const INVALID_REQUEST: &str = "INVALID_REQUEST";

/// Machine-readable code for everything else.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Errors returned by the query router.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The request was rejected before touching storage.
    #[error("{0}")]
    Validation(String),

    /// Every tier the request needed failed.
    #[error("all storage tiers failed: {0}")]
    TiersFailed(String),

    /// A storage read did not finish.
    #[error("query task failed: {0}")]
    Task(String),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl QueryError {
    /// Builds a validation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns true for request validation failures.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns the code reported to clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => INVALID_REQUEST,
            Self::TiersFailed(_) | Self::Task(_) | Self::InvalidConfig(_) => INTERNAL_ERROR,
        }
    }
}

/// Result type for query operations.
pub type Result<T> = std::result::Result<T, QueryError>;
