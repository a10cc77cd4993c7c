//! # vitals-archive
//!
//! Moves aged samples out of the hot path.
//!
//! Two jobs live here:
//!
//! - [`CompressionJob`] compresses whole hot-store partitions in place once
//!   they are older than the compression boundary. Compressed partitions
//!   stay queryable but reject further writes.
//! - [`ArchiveJob`] exports samples older than the archive boundary into
//!   zstd-compressed Parquet segments through a [`ColdStore`], advancing a
//!   durable per-site watermark only after a segment is fully written.
//!   Rows that arrive below the watermark later are merged into the
//!   segments they belong to on the next run.
//!
//! Segments are written to `{root}/{site}/{start}_{end}.parquet` with a
//! `point_name, timestamp, value, quality, flags` layout.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cold;
pub mod compress;
pub mod config;
pub mod error;
pub mod job;

pub use cold::{ColdRead, ColdStore, MemoryColdStore, ParquetColdStore, SegmentInfo};
pub use compress::{CompressionJob, CompressionReport};
pub use config::{ArchiveConfig, CompressionConfig};
pub use error::{ArchiveError, Result};
pub use job::{
    ArchiveCycleReport, ArchiveFailure, ArchiveJob, ArchiveRunReport, SegmentReport,
};
