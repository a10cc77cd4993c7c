//! # vitals-ingest
//!
//! Pulls building sensor samples of one or more sites from a paginated
//! external source into the hot store.
//!
//! A run computes its window, pages through the source, parses each row with
//! the versioned [`parser`], resolves point names in bulk, drops in-batch
//! duplicates (last write wins) and persists through a [`ChunkWriter`] that
//! falls back from plain inserts to progressively smaller upserts.
//!
//! Re-running over an overlapping window is idempotent.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vitals_ingest::{HttpSource, IngestConfig, IngestPipeline, SourceConfig};
//! use vitals_store::{SqliteStore, SystemClock};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteStore::open("vitals.db")?);
//! let source = HttpSource::new(SourceConfig::default().with_api_key("token"))?;
//! let pipeline = IngestPipeline::new(
//!     IngestConfig::new("building-vitals-hq").with_sites(["building-vitals-hq", "annex"]),
//!     Arc::new(source),
//!     store.clone(),
//!     store,
//!     Arc::new(SystemClock),
//! )?;
//! let report = pipeline.sync().await?;
//! println!("wrote {} samples across {} sites", report.written, report.sites.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod source;
pub mod writer;

pub use config::{IngestConfig, SourceConfig, WritePolicy, DEFAULT_SITE};
pub use error::{IngestError, Result};
pub use parser::{parse_rows, ParsedRow, SkipReason, SourceRecordV1, RECORD_SCHEMA_VERSION};
pub use pipeline::{
    BackfillReport, FailedWindow, IngestPipeline, IngestReport, SiteFailure, SyncReport,
};
pub use source::{HttpSource, PageRequest, SampleSource, SourcePage, StaticSource};
pub use writer::{ChunkWriter, WriteOutcome};
