//! # vitals-query
//!
//! Answers time-range queries over two storage tiers.
//!
//! Recent samples live in the hot store; anything older than the hot
//! boundary is read from archived Parquet segments. A [`QueryRouter`] splits
//! the requested range at `now - hot_boundary`, reads both portions
//! concurrently on the blocking pool, and returns one list ordered by
//! timestamp with per-tier provenance in the metadata.
//!
//! A tier that fails does not fail the request as long as another tier
//! answered; the failure is listed in `metadata.errors` instead.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vitals_archive::ParquetColdStore;
//! use vitals_query::{QueryConfig, QueryRequest, QueryRouter};
//! use vitals_store::{SqliteStore, SystemClock};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let router = QueryRouter::new(
//!     QueryConfig::new("building-vitals-hq"),
//!     Arc::new(SqliteStore::open("vitals.db")?),
//!     Some(Arc::new(ParquetColdStore::new("cold"))),
//!     Arc::new(SystemClock),
//! )?;
//! let request = QueryRequest::new("building-vitals-hq", &["AHU-1.SupplyTemp"], 0, 1_000);
//! let response = router.query(&request).await?;
//! println!("{} samples from {:?}", response.metadata.total_samples, response.metadata.sources);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod router;
pub mod types;

pub use config::QueryConfig;
pub use error::{QueryError, Result, INTERNAL_ERROR, INVALID_REQUEST};
pub use router::{QueryPlan, QueryRouter};
pub use types::{
    ColdTierStats, HotTierStats, LatestRequest, LatestResponse, QualityResponse, QueryMetadata,
    QueryRequest, QueryResponse, SampleView, StorageTiers, Tier, TierError, ValidatedQuery,
};
