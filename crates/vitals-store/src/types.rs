//! Core types for the hot store.
//!
//! This module provides the fundamental types shared by ingestion, archival and query:
//! - [`Point`]: identity of a measured signal
//! - [`Sample`]: one observation keyed by `(point_id, timestamp)`
//! - [`NamedSample`]: a sample joined with its point name, as returned by reads
//! - [`TimeRange`]: a half-open millisecond range
//! - [`ArchiveState`]: durable progress record of the archival pipeline

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Surrogate identifier of a point. Assigned once, never changed.
pub type PointId = i64;

/// Quality code for a sample with no known problems.
pub const QUALITY_GOOD: u8 = 192;

/// Kind of signal a point carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Continuous measurement (temperature, pressure, ...).
    #[default]
    Analog,
    /// On/off signal.
    Digital,
    /// Enumerated state.
    Multistate,
}

impl DataType {
    /// Returns the persisted name of this data type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Analog => "analog",
            Self::Digital => "digital",
            Self::Multistate => "multistate",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analog" => Ok(Self::Analog),
            "digital" => Ok(Self::Digital),
            "multistate" => Ok(Self::Multistate),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// A measured signal.
///
/// Points are created lazily the first time ingestion sees their name and are
/// never deleted. Hierarchy metadata is left unset at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Surrogate id.
    pub id: PointId,
    /// Site the point belongs to.
    pub site_name: String,
    /// Source identifier, unique within the site.
    pub name: String,
    /// Engineering unit, if known.
    pub unit: Option<String>,
    /// Signal kind.
    pub data_type: DataType,
    /// Building the point belongs to.
    pub building: Option<String>,
    /// System within the building (e.g. HVAC).
    pub system: Option<String>,
    /// Equipment within the system (e.g. AHU-1).
    pub equipment: Option<String>,
    /// Whether the point is flagged as critical.
    pub is_critical: bool,
    /// Expected sample interval in seconds.
    pub sample_rate_sec: Option<u32>,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Last metadata update, epoch milliseconds.
    pub updated_at: i64,
}

/// Status flag bitfield attached to a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleFlags(pub u8);

impl SampleFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// Point is in alarm.
    pub const ALARM: Self = Self(1);
    /// Value is operator-overridden.
    pub const OVERRIDE: Self = Self(1 << 1);
    /// Value is outside its configured range.
    pub const OUT_OF_RANGE: Self = Self(1 << 2);
    /// Sensor reported a fault.
    pub const SENSOR_FAULT: Self = Self(1 << 3);

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if every bit of `other` is set in `self`.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true if no flags are set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// One observation of a point.
///
/// `(point_id, timestamp)` is unique in the hot store; writing the same key
/// again overwrites the value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Point the sample belongs to.
    pub point_id: PointId,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Measured value.
    pub value: f64,
    /// Quality code (192 = good).
    pub quality: u8,
    /// Status flags.
    pub flags: SampleFlags,
}

impl Sample {
    /// Creates a sample with good quality and no flags.
    #[must_use]
    pub const fn new(point_id: PointId, timestamp: i64, value: f64) -> Self {
        Self {
            point_id,
            timestamp,
            value,
            quality: QUALITY_GOOD,
            flags: SampleFlags::NONE,
        }
    }

    /// Sets the quality code.
    #[must_use]
    pub const fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    /// Sets the status flags.
    #[must_use]
    pub const fn with_flags(mut self, flags: SampleFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// A sample joined with its point name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedSample {
    /// Point name.
    pub point_name: String,
    /// Epoch milliseconds.
    pub timestamp: i64,
    /// Measured value.
    pub value: f64,
    /// Quality code.
    pub quality: u8,
    /// Status flags.
    pub flags: SampleFlags,
}

impl NamedSample {
    /// Creates a named sample with good quality and no flags.
    #[must_use]
    pub fn new(point_name: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            point_name: point_name.into(),
            timestamp,
            value,
            quality: QUALITY_GOOD,
            flags: SampleFlags::NONE,
        }
    }
}

/// A half-open time range `[start, end)` in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start timestamp (inclusive).
    pub start: i64,
    /// End timestamp (exclusive).
    pub end: i64,
}

impl TimeRange {
    /// Creates a new time range.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTimeRange` if start > end.
    pub const fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(StoreError::InvalidTimeRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Returns true if the timestamp falls inside the range.
    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Returns true if the range covers no instant.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns true if the two ranges share at least one instant.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns the intersection of two ranges, or `None` if it is empty.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then_some(Self { start, end })
    }

    /// Returns the range duration in milliseconds.
    #[must_use]
    pub const fn duration_millis(&self) -> i64 {
        self.end - self.start
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Status of an archival run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveStatus {
    /// Export started but has not finished.
    InProgress,
    /// Export finished; the watermark advanced.
    Completed,
    /// Export failed; the watermark did not move.
    Failed,
}

impl ArchiveStatus {
    /// Returns the persisted name of this status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ArchiveStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown archive status: {other}")),
        }
    }
}

/// Durable progress record of one archival run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveState {
    /// Row id.
    pub id: i64,
    /// Site the run archived.
    pub site_name: String,
    /// Latest timestamp fully archived. For non-completed rows this is the
    /// watermark that was in force when the run started.
    pub last_archived_timestamp: i64,
    /// Number of samples exported.
    pub records_archived: u64,
    /// Location of the exported segment.
    pub archive_path: Option<String>,
    /// Size of the segment file in bytes.
    pub parquet_file_size: Option<u64>,
    /// Raw-to-compressed size ratio.
    pub compression_ratio: Option<f64>,
    /// When the row was last written, epoch milliseconds.
    pub archived_at: i64,
    /// Run status.
    pub status: ArchiveStatus,
    /// Diagnostic detail for failed runs.
    pub error_message: Option<String>,
}

/// Outcome of a successful export, recorded when a run completes.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveCompletion {
    /// New watermark.
    pub watermark: i64,
    /// Number of samples exported.
    pub records: u64,
    /// Location of the exported segment, if one was written.
    pub archive_path: Option<String>,
    /// Size of the segment file in bytes.
    pub file_size: u64,
    /// Raw-to-compressed size ratio.
    pub compression_ratio: f64,
}

/// Outcome of [`crate::PointRegistry::bulk_resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Resolved ids keyed by point name.
    pub ids: HashMap<String, PointId>,
    /// Points this call created.
    pub created: usize,
}

/// Day bucket that received writes at or below its site's watermark.
///
/// `version` grows with every such write, so a re-export only clears the
/// bucket if nothing landed in it after the export read the hot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirtyRange {
    /// Bucket span.
    pub range: TimeRange,
    /// Write counter at the time the bucket was read.
    pub version: i64,
}

/// Summary of a compressed hot-store partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Time span the partition covers.
    pub range: TimeRange,
    /// Number of samples stored in the partition.
    pub row_count: u64,
    /// Size of the column-encoded data before compression.
    pub raw_bytes: u64,
    /// Size after compression.
    pub compressed_bytes: u64,
    /// When the partition was compressed, epoch milliseconds.
    pub compressed_at: i64,
}

impl PartitionInfo {
    /// Returns the raw-to-compressed size ratio.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 0.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Per-point quality summary computed from raw rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Point name.
    pub point_name: String,
    /// Number of samples in the range.
    pub sample_count: u64,
    /// Samples with good quality.
    pub good_count: u64,
    /// Samples with any status flag set.
    pub flagged_count: u64,
    /// Minimum value.
    pub min: f64,
    /// Maximum value.
    pub max: f64,
    /// Mean value.
    pub avg: f64,
}

/// Result of one retention sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SweepOutcome {
    /// Cutoff used; rows strictly older were removed.
    pub cutoff: i64,
    /// Raw rows deleted.
    pub rows_deleted: u64,
    /// Compressed partitions deleted.
    pub partitions_deleted: u64,
}
