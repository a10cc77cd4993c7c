//! Storage ports.
//!
//! Ingestion, archival and query depend on these traits rather than on a
//! concrete database, so each can be exercised against in-memory fakes.

use crate::error::Result;
use crate::types::{
    ArchiveCompletion, ArchiveState, DirtyRange, NamedSample, PartitionInfo, Point, PointId,
    QualitySummary, Resolution, Sample, SweepOutcome, TimeRange,
};

/// Name-to-id mapping shared by ingestion and query.
///
/// Names are unique within a site; the same name under two sites is two
/// points.
pub trait PointRegistry: Send + Sync {
    /// Resolves a point name of `site` to its id, creating the point if absent.
    ///
    /// A concurrent writer creating the same name is not an error; the
    /// existing id is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read or written.
    fn resolve(&self, site: &str, name: &str) -> Result<PointId>;

    /// Resolves many names at once.
    ///
    /// Existing names are loaded in bulk; only names missing from that lookup
    /// are created. Names that could not be resolved are absent from the map.
    /// The returned count covers only points this call inserted, so a racing
    /// writer's creations are not attributed to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry is unavailable.
    fn bulk_resolve(&self, site: &str, names: &[String]) -> Result<Resolution>;

    /// Looks up a point by name without creating it.
    fn point(&self, site: &str, name: &str) -> Result<Option<Point>>;

    /// Returns the number of registered points across all sites.
    fn point_count(&self) -> Result<usize>;
}

/// Bounded-retention store of raw samples.
pub trait HotStore: Send + Sync {
    /// Inserts samples unconditionally in one transaction.
    ///
    /// Samples at or below their site's archive watermark mark their day
    /// bucket dirty (see [`ArchiveLedger::dirty_ranges`]).
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if any `(point_id, timestamp)` already
    /// exists; nothing from the batch is written in that case.
    fn insert_samples(&self, samples: &[Sample]) -> Result<usize>;

    /// Inserts samples, overwriting value, quality and flags of existing keys.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ImmutablePartition` if any sample falls inside a
    /// compressed partition; nothing from the batch is written in that case.
    fn upsert_samples(&self, samples: &[Sample]) -> Result<usize>;

    /// Returns samples of the named points of `site` inside `range`, ordered
    /// by timestamp then point name.
    fn query_range(&self, site: &str, names: &[String], range: TimeRange) -> Result<Vec<NamedSample>>;

    /// Returns every sample of `site` inside `range`, ordered by timestamp
    /// then point name.
    fn scan_range(&self, site: &str, range: TimeRange) -> Result<Vec<NamedSample>>;

    /// Returns the most recent sample of each named point that has one.
    fn latest(&self, site: &str, names: &[String]) -> Result<Vec<NamedSample>>;

    /// Returns per-point quality summaries over `range`.
    fn quality_summary(
        &self,
        site: &str,
        names: &[String],
        range: TimeRange,
    ) -> Result<Vec<QualitySummary>>;

    /// Returns the timestamp of the oldest stored sample, of one site or of
    /// the whole store.
    fn earliest_timestamp(&self, site: Option<&str>) -> Result<Option<i64>>;

    /// Returns the total number of stored samples, compressed or not.
    fn sample_count(&self) -> Result<u64>;

    /// Returns true if the store holds no samples.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.sample_count()? == 0)
    }

    /// Deletes raw rows older than `cutoff` and compressed partitions ending
    /// at or before it.
    fn delete_before(&self, cutoff: i64) -> Result<SweepOutcome>;

    /// Returns aligned partitions of `width_millis` that still hold raw rows
    /// and end at or before `cutoff`.
    fn raw_partitions_before(&self, cutoff: i64, width_millis: i64) -> Result<Vec<TimeRange>>;

    /// Compresses the raw rows of `partition` and marks it immutable.
    ///
    /// Returns `None` if the partition held no raw rows.
    fn compress_partition(&self, partition: TimeRange) -> Result<Option<PartitionInfo>>;

    /// Returns all compressed partitions, oldest first.
    fn compressed_partitions(&self) -> Result<Vec<PartitionInfo>>;
}

/// Durable record of archival progress, kept per site.
pub trait ArchiveLedger: Send + Sync {
    /// Records the start of a run for `site` and returns its row id.
    fn begin_run(&self, site: &str, archived_at: i64) -> Result<i64>;

    /// Marks a run completed and advances the watermark.
    fn complete_run(&self, id: i64, completion: &ArchiveCompletion, archived_at: i64) -> Result<()>;

    /// Marks a run failed. The watermark is left unchanged.
    fn fail_run(&self, id: i64, error: &str, archived_at: i64) -> Result<()>;

    /// Returns the latest completed watermark of `site`.
    fn watermark(&self, site: &str) -> Result<Option<i64>>;

    /// Returns the most recent runs of every site, newest first.
    fn recent_runs(&self, limit: usize) -> Result<Vec<ArchiveState>>;

    /// Returns the buckets of `site` written at or below its watermark since
    /// they were last exported, oldest first.
    fn dirty_ranges(&self, site: &str) -> Result<Vec<DirtyRange>>;

    /// Clears a dirty bucket if its version still matches.
    ///
    /// Returns false if a later write bumped the version; the bucket then
    /// stays dirty for the next run.
    fn clear_dirty(&self, site: &str, dirty: &DirtyRange) -> Result<bool>;
}
