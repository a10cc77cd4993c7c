//! Error types for the server and its HTTP responses.

use std::net::SocketAddr;

use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use vitals_archive::ArchiveError;
use vitals_ingest::IngestError;
use vitals_query::{QueryError, INTERNAL_ERROR, INVALID_REQUEST};
use vitals_store::StoreError;

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors raised by the server, its jobs and its handlers.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind the listener.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// Malformed request parameters, from a query string or the command line.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A query failed.
    #[error(transparent)]
    Query(#[from] QueryError),

    /// An ingestion run failed.
    #[error("ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// An archive or compression run failed.
    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    /// The hot store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A blocking job did not finish.
    #[error("background task failed: {0}")]
    Task(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns the code reported to clients.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => INVALID_REQUEST,
            Self::Query(err) => err.error_code(),
            _ => INTERNAL_ERROR,
        }
    }

    /// Returns the HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        if self.error_code() == INVALID_REQUEST {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    error_code: &'static str,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            error_code: self.error_code(),
        };
        (status, Json(body)).into_response()
    }
}
