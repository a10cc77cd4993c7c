//! HTTP request handlers.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::Json;
use chrono::{DateTime, SecondsFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;
use vitals_query::{LatestRequest, LatestResponse, QualityResponse, QueryRequest, QueryResponse};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Query-string extractor whose rejection is a JSON `INVALID_REQUEST` body.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers.
    pub status: &'static str,
    /// Current time, RFC 3339.
    pub timestamp: String,
    /// Service version.
    pub version: &'static str,
}

/// Handle GET /health.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let timestamp = DateTime::from_timestamp_millis(state.clock().now_millis())
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default();
    Json(HealthResponse {
        status: "ok",
        timestamp,
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Handle GET /timeseries/query.
pub async fn query_timeseries(
    State(state): State<Arc<AppState>>,
    ApiQuery(request): ApiQuery<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    Ok(Json(state.router().query(&request).await?))
}

/// Handle GET /timeseries/latest.
pub async fn latest_samples(
    State(state): State<Arc<AppState>>,
    ApiQuery(request): ApiQuery<LatestRequest>,
) -> Result<Json<LatestResponse>> {
    Ok(Json(state.router().latest(&request).await?))
}

/// Handle GET /timeseries/quality.
pub async fn quality_summary(
    State(state): State<Arc<AppState>>,
    ApiQuery(request): ApiQuery<QueryRequest>,
) -> Result<Json<QualityResponse>> {
    Ok(Json(state.router().quality(&request).await?))
}
