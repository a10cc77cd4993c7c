//! Request and response types for tiered queries.
//!
//! Requests arrive as loosely-typed strings (query-string parameters) and are
//! validated into [`ValidatedQuery`] before any storage is touched.

use std::fmt;

use serde::{Deserialize, Serialize};
use vitals_store::{NamedSample, QualitySummary, TimeRange};

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};

/// Storage tier that served part of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// The hot store.
    Hot,
    /// Archived Parquet segments.
    Cold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hot => f.write_str("hot"),
            Self::Cold => f.write_str("cold"),
        }
    }
}

/// A range query as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Site name.
    pub site_name: Option<String>,
    /// Comma-separated point names.
    pub point_names: Option<String>,
    /// Range start in epoch milliseconds (inclusive).
    pub start_time: Option<String>,
    /// Range end in epoch milliseconds (exclusive).
    pub end_time: Option<String>,
}

impl QueryRequest {
    /// Builds a request from typed values.
    #[must_use]
    pub fn new(site: &str, points: &[&str], start: i64, end: i64) -> Self {
        Self {
            site_name: Some(site.to_string()),
            point_names: Some(points.join(",")),
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
        }
    }

    /// Validates the request against `config` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` when a field is missing or
    /// malformed, the site is not served here, the range is inverted, the
    /// start lies in the future, or the end lies beyond `now + max_future`.
    pub fn validate(&self, config: &QueryConfig, now: i64) -> Result<ValidatedQuery> {
        let site = required_site(self.site_name.as_deref(), config)?;
        let point_names = split_points(self.point_names.as_deref())?;
        let start = required_millis(self.start_time.as_deref(), "start_time")?;
        let end = required_millis(self.end_time.as_deref(), "end_time")?;

        if start > end {
            return Err(QueryError::invalid(format!(
                "start_time ({start}) must not be after end_time ({end})"
            )));
        }
        if start > now {
            return Err(QueryError::invalid(format!(
                "start_time ({start}) must not be in the future"
            )));
        }
        let horizon = now.saturating_add(config.max_future.as_millis() as i64);
        if end > horizon {
            return Err(QueryError::invalid(format!(
                "end_time ({end}) must not exceed {horizon}"
            )));
        }

        let range = TimeRange::new(start, end).map_err(|e| QueryError::invalid(e.to_string()))?;
        Ok(ValidatedQuery {
            site,
            point_names,
            range,
        })
    }
}

/// A latest-value lookup as received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestRequest {
    /// Site name.
    pub site_name: Option<String>,
    /// Comma-separated point names.
    pub point_names: Option<String>,
}

impl LatestRequest {
    /// Builds a request from typed values.
    #[must_use]
    pub fn new(site: &str, points: &[&str]) -> Self {
        Self {
            site_name: Some(site.to_string()),
            point_names: Some(points.join(",")),
        }
    }

    /// Validates the site and point list.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` on a missing field or foreign site.
    pub fn validate(&self, config: &QueryConfig) -> Result<(String, Vec<String>)> {
        let site = required_site(self.site_name.as_deref(), config)?;
        let points = split_points(self.point_names.as_deref())?;
        Ok((site, points))
    }
}

/// A validated range query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// Site name.
    pub site: String,
    /// Distinct point names in request order.
    pub point_names: Vec<String>,
    /// Requested range.
    pub range: TimeRange,
}

fn required_site(site: Option<&str>, config: &QueryConfig) -> Result<String> {
    let site = site
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::invalid("site_name is required"))?;
    if !config.has_site(site) {
        return Err(QueryError::invalid(format!("unknown site: {site}")));
    }
    Ok(site.to_string())
}

fn split_points(points: Option<&str>) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();
    for name in points.unwrap_or_default().split(',').map(str::trim) {
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    if names.is_empty() {
        return Err(QueryError::invalid("point_names is required"));
    }
    Ok(names)
}

fn required_millis(value: Option<&str>, field: &str) -> Result<i64> {
    let value = value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::invalid(format!("{field} is required")))?;
    value
        .parse()
        .map_err(|_| QueryError::invalid(format!("{field} must be epoch milliseconds, got {value:?}")))
}

/// One returned sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleView {
    /// Point name.
    pub point_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Measured value.
    pub value: f64,
}

impl From<NamedSample> for SampleView {
    fn from(sample: NamedSample) -> Self {
        Self {
            point_name: sample.point_name,
            timestamp: sample.timestamp,
            value: sample.value,
        }
    }
}

/// Hot-tier provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotTierStats {
    /// Range start.
    pub start: i64,
    /// Range end.
    pub end: i64,
    /// Samples returned by the tier.
    pub sample_count: usize,
}

/// Cold-tier provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColdTierStats {
    /// Range start.
    pub start: i64,
    /// Range end.
    pub end: i64,
    /// Segments opened.
    pub file_count: usize,
}

/// Per-tier provenance for tiers that answered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTiers {
    /// Hot tier, if it served part of the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hot: Option<HotTierStats>,
    /// Cold tier, if it served part of the query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cold: Option<ColdTierStats>,
}

/// A tier that failed or was unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierError {
    /// Failing tier.
    pub tier: Tier,
    /// Failure description.
    pub error: String,
}

/// Query metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetadata {
    /// Number of samples returned.
    pub total_samples: usize,
    /// Tiers that contributed, hot first.
    pub sources: Vec<Tier>,
    /// Per-tier provenance.
    pub storage_tiers: StorageTiers,
    /// Wall-clock time spent.
    pub query_time_ms: u64,
    /// Tiers that could not be read.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<TierError>,
}

/// Range query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Site name.
    pub site_name: String,
    /// Requested points.
    pub point_names: Vec<String>,
    /// Samples ordered by timestamp, then point name.
    pub samples: Vec<SampleView>,
    /// Provenance.
    pub metadata: QueryMetadata,
}

/// Latest-value response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestResponse {
    /// Site name.
    pub site_name: String,
    /// Newest sample of each point that has one.
    pub samples: Vec<NamedSample>,
}

/// Quality summary response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResponse {
    /// Site name.
    pub site_name: String,
    /// Range start.
    pub start_time: i64,
    /// Range end.
    pub end_time: i64,
    /// One summary per point with samples in range.
    pub points: Vec<QualitySummary>,
}
