//! # vitals-store
//!
//! Point registry and hot store for high-frequency building sensor samples.
//!
//! This crate provides:
//!
//! - [`Point`], [`Sample`], [`NamedSample`]: the data model
//! - [`TimeRange`]: half-open `[start, end)` millisecond ranges
//! - [`DirtyRange`]: archived buckets that received late writes
//! - [`PointRegistry`], [`HotStore`], [`ArchiveLedger`]: storage ports
//! - [`SqliteStore`]: SQLite implementation of every port
//! - [`RetentionSweeper`]: scheduled removal of rows past the horizon
//! - [`Clock`]: injectable time source
//!
//! ## Example
//!
//! ```rust
//! use vitals_store::{HotStore, PointRegistry, Sample, SqliteStore, TimeRange};
//!
//! let store = SqliteStore::open_in_memory().unwrap();
//! let id = store.resolve("hq", "AHU-1.SupplyTemp").unwrap();
//!
//! store.upsert_samples(&[Sample::new(id, 1_000, 21.5)]).unwrap();
//!
//! let names = vec!["AHU-1.SupplyTemp".to_string()];
//! let rows = store.query_range("hq", &names, TimeRange::new(0, 2_000).unwrap()).unwrap();
//! assert_eq!(rows.len(), 1);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod codec;
pub mod error;
pub mod retention;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StoreError};
pub use retention::{RetentionConfig, RetentionSweeper};
pub use sqlite::SqliteStore;
pub use traits::{ArchiveLedger, HotStore, PointRegistry};
pub use types::{
    ArchiveCompletion, ArchiveState, ArchiveStatus, DataType, DirtyRange, NamedSample,
    PartitionInfo, Point, PointId, QualitySummary, Resolution, Sample, SampleFlags, SweepOutcome,
    TimeRange, QUALITY_GOOD,
};
