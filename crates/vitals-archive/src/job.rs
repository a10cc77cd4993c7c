//! Watermarked export of aged samples into cold storage.
//!
//! Each site keeps its own watermark. A segment covers `(watermark, next]`
//! where `next` is bounded by the archive cutoff (`now - archive_after`) and
//! by the maximum segment span. A run records an `in_progress` ledger row,
//! exports, then marks the row `completed` (advancing the watermark) or
//! `failed` (leaving it alone, so the next run retries the same range).
//!
//! Rows written at or below the watermark after their range was exported
//! leave a dirty day bucket behind. Before moving forward, a run rewrites
//! every cold segment overlapping a dirty bucket with the union of its
//! current content and the hot rows, hot winning on `(point, timestamp)`.
//! Parts of a bucket that no segment covers get a new segment.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};
use vitals_store::{ArchiveCompletion, ArchiveLedger, Clock, HotStore, NamedSample, TimeRange};

use crate::cold::{ColdStore, SegmentInfo};
use crate::config::ArchiveConfig;
use crate::error::{ArchiveError, Result};

/// Outcome of one exported segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentReport {
    /// Ledger row id.
    pub run_id: i64,
    /// Half-open range exported. Forward exports cover
    /// `[watermark + 1, new_watermark + 1)`.
    pub range: TimeRange,
    /// Samples in the segment.
    pub records: u64,
    /// Segment location; `None` for an empty range.
    pub archive_path: Option<String>,
    /// Segment size in bytes.
    pub file_size: u64,
    /// Raw-to-stored size ratio.
    pub compression_ratio: f64,
    /// Watermark after the segment.
    pub watermark: i64,
}

/// Summary of one site's archive run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveRunReport {
    /// Site archived.
    pub site: String,
    /// Segments exported past the previous watermark, oldest first.
    pub segments: Vec<SegmentReport>,
    /// Segments rewritten because late rows landed below the watermark.
    pub reexported: Vec<SegmentReport>,
    /// Total samples exported past the previous watermark.
    pub records: u64,
    /// Watermark at the end of the run.
    pub watermark: Option<i64>,
    /// Archive cutoff used.
    pub cutoff: i64,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// A site whose archive run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveFailure {
    /// The site.
    pub site: String,
    /// What went wrong.
    pub error: String,
}

/// Summary of one archive cycle over every configured site.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArchiveCycleReport {
    /// Reports of the sites that finished.
    pub sites: Vec<ArchiveRunReport>,
    /// Sites whose run failed.
    pub failed: Vec<ArchiveFailure>,
    /// Samples exported past the previous watermarks.
    pub records: u64,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl ArchiveCycleReport {
    /// Returns the report of `site`, if its run finished.
    #[must_use]
    pub fn site(&self, site: &str) -> Option<&ArchiveRunReport> {
        self.sites.iter().find(|r| r.site == site)
    }
}

/// Exports aged samples from the hot store into a cold store.
pub struct ArchiveJob {
    config: ArchiveConfig,
    store: Arc<dyn HotStore>,
    ledger: Arc<dyn ArchiveLedger>,
    cold: Arc<dyn ColdStore>,
    clock: Arc<dyn Clock>,
}

impl ArchiveJob {
    /// Creates a job.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` if the configuration is inconsistent.
    pub fn new(
        config: ArchiveConfig,
        store: Arc<dyn HotStore>,
        ledger: Arc<dyn ArchiveLedger>,
        cold: Arc<dyn ColdStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            ledger,
            cold,
            clock,
        })
    }

    /// Returns the job configuration.
    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Returns the current archive cutoff.
    #[must_use]
    pub fn cutoff(&self) -> i64 {
        self.clock.now_millis() - self.config.archive_after.as_millis() as i64
    }

    /// Runs every configured site in order.
    ///
    /// A failing site is recorded in [`ArchiveCycleReport::failed`] and the
    /// next site still runs.
    ///
    /// # Errors
    ///
    /// Returns the first site's error if no site finished.
    pub fn run(&self) -> Result<ArchiveCycleReport> {
        let started = Instant::now();
        let mut cycle = ArchiveCycleReport::default();
        let mut first_error = None;

        for site in &self.config.sites {
            match self.run_site(site) {
                Ok(report) => {
                    cycle.records += report.records;
                    cycle.sites.push(report);
                }
                Err(err) => {
                    warn!(site = %site, error = %err, "site archive run failed, continuing with next site");
                    cycle.failed.push(ArchiveFailure {
                        site: site.clone(),
                        error: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            }
        }

        if cycle.sites.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        cycle.duration_ms = started.elapsed().as_millis() as u64;
        Ok(cycle)
    }

    /// Re-exports the site's dirty buckets, then exports segments until the
    /// watermark reaches the cutoff or the per-run bound is hit.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` for a site that is not
    /// configured, or the first export failure. That segment's ledger row is
    /// marked `failed` and segments exported before it stay completed.
    pub fn run_site(&self, site: &str) -> Result<ArchiveRunReport> {
        if !self.config.sites.iter().any(|s| s == site) {
            return Err(ArchiveError::InvalidConfig(format!("site {site} is not configured")));
        }
        let started = Instant::now();
        let cutoff = self.cutoff();
        let mut report = ArchiveRunReport {
            site: site.to_string(),
            cutoff,
            watermark: self.ledger.watermark(site)?,
            ..ArchiveRunReport::default()
        };

        if let Some(watermark) = report.watermark {
            report.reexported = self.reexport_dirty(site, watermark)?;
        }

        for _ in 0..self.config.max_segments_per_run {
            let Some(range) = self.next_range(site, cutoff)? else {
                break;
            };
            let segment = self.export(site, range)?;
            report.records += segment.records;
            report.watermark = Some(segment.watermark);
            report.segments.push(segment);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            site,
            segments = report.segments.len(),
            reexported = report.reexported.len(),
            records = report.records,
            watermark = ?report.watermark,
            cutoff,
            duration_ms = report.duration_ms,
            "archive run finished"
        );
        Ok(report)
    }

    /// Computes the next unarchived range, or `None` when caught up.
    fn next_range(&self, site: &str, cutoff: i64) -> Result<Option<TimeRange>> {
        let lower = match self.ledger.watermark(site)? {
            Some(watermark) => watermark,
            None => match self.store.earliest_timestamp(Some(site))? {
                Some(earliest) => earliest - 1,
                None => return Ok(None),
            },
        };
        if lower >= cutoff {
            return Ok(None);
        }
        let span = self.config.max_segment.as_millis() as i64;
        let upper = cutoff.min(lower.saturating_add(span));
        Ok(Some(TimeRange {
            start: lower + 1,
            end: upper + 1,
        }))
    }

    fn export(&self, site: &str, range: TimeRange) -> Result<SegmentReport> {
        let watermark = range.end - 1;
        self.record(site, range, watermark, || {
            let samples = self.store.scan_range(site, range)?;
            if samples.is_empty() {
                return Ok(None);
            }
            self.cold.write_segment(site, range, &samples).map(Some)
        })
    }

    /// Rewrites the cold segments under every dirty bucket of `site`.
    ///
    /// Buckets are read before the hot store, so a write racing the rewrite
    /// bumps the bucket version and keeps it dirty for the next run.
    fn reexport_dirty(&self, site: &str, watermark: i64) -> Result<Vec<SegmentReport>> {
        let dirty = self.ledger.dirty_ranges(site)?;
        if dirty.is_empty() {
            return Ok(Vec::new());
        }
        let segments = self.cold.segments(site)?;
        let targets: BTreeSet<(i64, i64)> = dirty
            .iter()
            .flat_map(|bucket| rewrite_targets(bucket.range, watermark, &segments))
            .map(|r| (r.start, r.end))
            .collect();

        let mut reports = Vec::with_capacity(targets.len());
        for (start, end) in targets {
            let range = TimeRange { start, end };
            let report = self.record(site, range, watermark, || self.merge_segment(site, range))?;
            reports.push(report);
        }

        for bucket in &dirty {
            if !self.ledger.clear_dirty(site, bucket)? {
                info!(site, bucket = %bucket.range, "bucket written during re-export, keeping it dirty");
            }
        }
        info!(
            site,
            buckets = dirty.len(),
            segments = reports.len(),
            records = reports.iter().map(|r| r.records).sum::<u64>(),
            "re-exported late rows"
        );
        Ok(reports)
    }

    /// Writes the union of the segment's cold content and the hot rows in
    /// `range`. Rows the sweep already removed from the hot store survive
    /// through the cold copy.
    fn merge_segment(&self, site: &str, range: TimeRange) -> Result<Option<SegmentInfo>> {
        let mut merged: BTreeMap<(i64, String), NamedSample> = BTreeMap::new();
        for sample in self.cold.read_segment(site, range)? {
            merged.insert((sample.timestamp, sample.point_name.clone()), sample);
        }
        for sample in self.store.scan_range(site, range)? {
            merged.insert((sample.timestamp, sample.point_name.clone()), sample);
        }
        if merged.is_empty() {
            return Ok(None);
        }
        let samples: Vec<NamedSample> = merged.into_values().collect();
        self.cold.write_segment(site, range, &samples).map(Some)
    }

    /// Wraps one segment write in a ledger row completed at `watermark`.
    fn record<F>(&self, site: &str, range: TimeRange, watermark: i64, write: F) -> Result<SegmentReport>
    where
        F: FnOnce() -> Result<Option<SegmentInfo>>,
    {
        let run_id = self.ledger.begin_run(site, self.clock.now_millis())?;
        match write() {
            Ok(segment) => {
                let completion = ArchiveCompletion {
                    watermark,
                    records: segment.as_ref().map_or(0, |s| s.rows),
                    archive_path: segment.as_ref().map(|s| s.path.clone()),
                    file_size: segment.as_ref().map_or(0, |s| s.file_size),
                    compression_ratio: segment.as_ref().map_or(0.0, SegmentInfo::compression_ratio),
                };
                self.ledger
                    .complete_run(run_id, &completion, self.clock.now_millis())?;
                info!(
                    site,
                    run_id,
                    range = %range,
                    records = completion.records,
                    watermark,
                    "archived segment"
                );
                Ok(SegmentReport {
                    run_id,
                    range,
                    records: completion.records,
                    archive_path: completion.archive_path,
                    file_size: completion.file_size,
                    compression_ratio: completion.compression_ratio,
                    watermark,
                })
            }
            Err(err) => {
                error!(site, run_id, range = %range, error = %err, "archive export failed");
                self.ledger
                    .fail_run(run_id, &err.to_string(), self.clock.now_millis())?;
                Err(err)
            }
        }
    }
}

/// Splits the part of `bucket` at or below `watermark` into the existing
/// segments overlapping it and the gaps between them.
fn rewrite_targets(bucket: TimeRange, watermark: i64, segments: &[SegmentInfo]) -> Vec<TimeRange> {
    let archived = TimeRange {
        start: i64::MIN,
        end: watermark.saturating_add(1),
    };
    let Some(bucket) = bucket.intersect(&archived) else {
        return Vec::new();
    };

    let mut targets = Vec::new();
    let mut cursor = bucket.start;
    for segment in segments.iter().filter(|s| s.range.overlaps(&bucket)) {
        if segment.range.start > cursor {
            targets.push(TimeRange {
                start: cursor,
                end: segment.range.start,
            });
        }
        targets.push(segment.range);
        cursor = cursor.max(segment.range.end);
    }
    if cursor < bucket.end {
        targets.push(TimeRange {
            start: cursor,
            end: bucket.end,
        });
    }
    targets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cold::{MemoryColdStore, ParquetColdStore};
    use std::time::Duration;
    use vitals_store::{ArchiveStatus, ManualClock, PointRegistry, Sample, SqliteStore};

    const DAY: i64 = 86_400_000;
    const SITE: &str = "S1";

    struct Fixture {
        store: Arc<SqliteStore>,
        cold: Arc<MemoryColdStore>,
        clock: Arc<ManualClock>,
        job: ArchiveJob,
    }

    fn fixture(config: ArchiveConfig) -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cold = Arc::new(MemoryColdStore::new());
        let clock = Arc::new(ManualClock::new(20 * DAY));
        let job = ArchiveJob::new(config, store.clone(), store.clone(), cold.clone(), clock.clone()).unwrap();
        Fixture { store, cold, clock, job }
    }

    fn seed(store: &SqliteStore, timestamps: &[i64]) {
        seed_point(store, SITE, "AHU-1.SAT", timestamps, 21.0);
    }

    fn seed_point(store: &SqliteStore, site: &str, name: &str, timestamps: &[i64], value: f64) {
        let id = store.resolve(site, name).unwrap();
        let samples: Vec<Sample> = timestamps.iter().map(|t| Sample::new(id, *t, value)).collect();
        store.upsert_samples(&samples).unwrap();
    }

    fn cold_rows(cold: &dyn ColdStore, site: &str, names: &[&str]) -> Vec<NamedSample> {
        let names: Vec<String> = names.iter().map(|n| (*n).to_string()).collect();
        cold.read_range(site, &names, TimeRange::new(0, 20 * DAY).unwrap())
            .unwrap()
            .samples
    }

    fn wide() -> ArchiveConfig {
        ArchiveConfig::new(SITE, "/unused").with_max_segment(Duration::from_secs(365 * 86_400))
    }

    #[test]
    fn empty_store_is_a_noop() {
        let f = fixture(wide());
        let report = f.job.run_site(SITE).unwrap();
        assert!(report.segments.is_empty());
        assert!(f.store.recent_runs(10).unwrap().is_empty());
    }

    #[test]
    fn first_run_starts_at_earliest_sample() {
        let f = fixture(wide());
        seed(&f.store, &[DAY, 5 * DAY, 13 * DAY - 1, 13 * DAY, 15 * DAY]);

        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.cutoff, 13 * DAY);
        assert_eq!(report.segments.len(), 1);
        let segment = &report.segments[0];
        assert_eq!(segment.range, TimeRange::new(DAY, 13 * DAY + 1).unwrap());
        // The cutoff itself is included: (watermark, cutoff].
        assert_eq!(segment.records, 4);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(13 * DAY));
    }

    #[test]
    fn next_run_starts_after_watermark() {
        let f = fixture(wide());
        seed(&f.store, &[DAY, 14 * DAY]);
        f.job.run_site(SITE).unwrap();

        f.clock.advance(Duration::from_secs(2 * 86_400));
        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.segments.len(), 1);
        assert_eq!(report.segments[0].range.start, 13 * DAY + 1);
        assert_eq!(report.segments[0].records, 1);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(15 * DAY));

        // Caught up: nothing more to do.
        assert!(f.job.run_site(SITE).unwrap().segments.is_empty());
    }

    #[test]
    fn empty_range_completes_with_zero_records() {
        let f = fixture(wide());
        seed(&f.store, &[DAY]);
        f.job.run_site(SITE).unwrap();
        f.clock.advance(Duration::from_secs(86_400));

        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.segments[0].records, 0);
        assert!(report.segments[0].archive_path.is_none());
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(14 * DAY));
    }

    #[test]
    fn failure_leaves_watermark_and_retries_same_range() {
        let f = fixture(wide());
        seed(&f.store, &[DAY, 2 * DAY]);
        f.cold.set_unavailable(true);

        let err = f.job.run_site(SITE).unwrap_err();
        assert!(matches!(err, ArchiveError::Unavailable(_)));
        assert_eq!(f.store.watermark(SITE).unwrap(), None);
        let runs = f.store.recent_runs(10).unwrap();
        assert_eq!(runs[0].status, ArchiveStatus::Failed);
        assert!(runs[0].error_message.as_deref().unwrap_or("").contains("unavailable"));

        f.cold.set_unavailable(false);
        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.segments[0].range.start, DAY);
        assert_eq!(report.segments[0].records, 2);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(13 * DAY));
    }

    #[test]
    fn segments_are_bounded_and_contiguous() {
        let f = fixture(ArchiveConfig::new(SITE, "/unused").with_max_segment(Duration::from_secs(4 * 86_400)));
        seed(&f.store, &[DAY, 6 * DAY, 11 * DAY]);

        let report = f.job.run_site(SITE).unwrap();
        // [DAY, 5d), [5d, 9d), [9d, 13d), then the cutoff instant itself.
        assert_eq!(report.segments.len(), 4);
        for pair in report.segments.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
            assert!(pair[1].watermark >= pair[0].watermark);
        }
        assert_eq!(report.records, 3);
        assert_eq!(report.watermark, Some(13 * DAY));
    }

    #[test]
    fn per_run_bound_is_respected() {
        let config = ArchiveConfig::new(SITE, "/unused")
            .with_max_segment(Duration::from_secs(86_400))
            .with_max_segments_per_run(2);
        let f = fixture(config);
        seed(&f.store, &[DAY]);

        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.segments.len(), 2);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(3 * DAY - 1));
    }

    #[test]
    fn exports_to_parquet() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, &[DAY, 2 * DAY]);
        let cold = Arc::new(ParquetColdStore::new(dir.path()));
        let job = ArchiveJob::new(
            ArchiveConfig::new(SITE, dir.path()),
            store.clone(),
            store.clone(),
            cold.clone(),
            Arc::new(ManualClock::new(20 * DAY)),
        )
        .unwrap();

        let report = job.run_site(SITE).unwrap();
        let path = report.segments[0].archive_path.clone().unwrap();
        assert!(std::path::Path::new(&path).exists());

        let runs = store.recent_runs(1).unwrap();
        assert_eq!(runs[0].status, ArchiveStatus::Completed);
        assert_eq!(runs[0].archive_path.as_deref(), Some(path.as_str()));
        assert!(runs[0].parquet_file_size.unwrap_or(0) > 0);

        let read = cold
            .read_range(SITE, &["AHU-1.SAT".to_string()], TimeRange::new(0, 20 * DAY).unwrap())
            .unwrap();
        assert_eq!(read.samples.len(), 2);
    }

    // =========================================================================
    // Late rows below the watermark
    // =========================================================================

    #[test]
    fn late_rows_below_watermark_are_reexported() {
        let f = fixture(wide());
        seed(&f.store, &[DAY, 2 * DAY]);
        let first = f.job.run_site(SITE).unwrap();
        let segment = first.segments[0].range;

        seed_point(&f.store, SITE, "AHU-1.SAT", &[DAY], 30.0);
        seed_point(&f.store, SITE, "VAV-1.Flow", &[5 * DAY], 400.0);
        assert_eq!(f.store.dirty_ranges(SITE).unwrap().len(), 2);

        let report = f.job.run_site(SITE).unwrap();
        assert!(report.segments.is_empty());
        assert_eq!(report.reexported.len(), 1);
        assert_eq!(report.reexported[0].range, segment);
        assert_eq!(report.reexported[0].records, 3);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(13 * DAY));
        assert!(f.store.dirty_ranges(SITE).unwrap().is_empty());

        let rows = cold_rows(f.cold.as_ref(), SITE, &["AHU-1.SAT", "VAV-1.Flow"]);
        assert_eq!(rows.len(), 3);
        assert!((rows[0].value - 30.0).abs() < f64::EPSILON);
        assert_eq!(rows[2].point_name, "VAV-1.Flow");

        // Nothing left to redo.
        assert!(f.job.run_site(SITE).unwrap().reexported.is_empty());
    }

    #[test]
    fn late_rows_before_first_segment_get_their_own_segment() {
        let f = fixture(wide());
        seed(&f.store, &[10 * DAY]);
        f.job.run_site(SITE).unwrap();

        seed(&f.store, &[2 * DAY + 7]);
        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.reexported.len(), 1);
        assert_eq!(report.reexported[0].range, TimeRange::new(2 * DAY, 3 * DAY).unwrap());
        assert_eq!(report.reexported[0].records, 1);

        let segments = f.cold.segments(SITE).unwrap();
        assert_eq!(segments.len(), 2);
        assert!(!segments[0].range.overlaps(&segments[1].range));
        assert_eq!(cold_rows(f.cold.as_ref(), SITE, &["AHU-1.SAT"]).len(), 2);
    }

    #[test]
    fn reexport_keeps_rows_already_swept_from_hot() {
        let f = fixture(wide());
        seed(&f.store, &[DAY, DAY + 1]);
        f.job.run_site(SITE).unwrap();

        f.store.delete_before(DAY + 1).unwrap();
        seed(&f.store, &[DAY + 2]);
        let report = f.job.run_site(SITE).unwrap();

        assert_eq!(report.reexported[0].records, 3);
        let stamps: Vec<i64> = cold_rows(f.cold.as_ref(), SITE, &["AHU-1.SAT"])
            .iter()
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(stamps, vec![DAY, DAY + 1, DAY + 2]);
    }

    #[test]
    fn failed_reexport_keeps_bucket_dirty() {
        let f = fixture(wide());
        seed(&f.store, &[DAY]);
        f.job.run_site(SITE).unwrap();
        seed(&f.store, &[DAY + 5]);

        f.cold.set_unavailable(true);
        assert!(f.job.run_site(SITE).is_err());
        assert_eq!(f.store.dirty_ranges(SITE).unwrap().len(), 1);
        assert_eq!(f.store.watermark(SITE).unwrap(), Some(13 * DAY));

        f.cold.set_unavailable(false);
        let report = f.job.run_site(SITE).unwrap();
        assert_eq!(report.reexported[0].records, 2);
        assert!(f.store.dirty_ranges(SITE).unwrap().is_empty());
    }

    #[test]
    fn rewrite_targets_cover_segments_and_gaps() {
        let segment = |start, end| SegmentInfo {
            range: TimeRange::new(start, end).unwrap(),
            path: String::new(),
            rows: 1,
            file_size: 1,
            raw_bytes: 1,
        };
        let segments = vec![segment(0, 30), segment(50, 70), segment(70, 200)];
        let bucket = TimeRange::new(20, 100).unwrap();

        let targets = rewrite_targets(bucket, 1_000, &segments);
        let spans: Vec<(i64, i64)> = targets.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(spans, vec![(0, 30), (30, 50), (50, 70), (70, 200)]);

        // Only the part at or below the watermark is rewritten.
        let clipped = rewrite_targets(TimeRange::new(300, 400).unwrap(), 349, &segments);
        assert_eq!(clipped, vec![TimeRange::new(300, 350).unwrap()]);
        assert!(rewrite_targets(TimeRange::new(300, 400).unwrap(), 100, &segments).is_empty());
    }

    // =========================================================================
    // Sites
    // =========================================================================

    #[test]
    fn sites_keep_separate_watermarks() {
        let f = fixture(wide().with_sites([SITE, "S2"]));
        seed(&f.store, &[DAY]);
        seed_point(&f.store, "S2", "AHU-1.SAT", &[5 * DAY, 6 * DAY], 19.0);

        let cycle = f.job.run().unwrap();
        assert_eq!(cycle.sites.len(), 2);
        assert_eq!(cycle.records, 3);
        assert_eq!(cycle.site("S2").unwrap().segments[0].range.start, 5 * DAY);
        assert_eq!(f.store.watermark("S2").unwrap(), Some(13 * DAY));
        assert_eq!(cold_rows(f.cold.as_ref(), SITE, &["AHU-1.SAT"]).len(), 1);
        assert_eq!(cold_rows(f.cold.as_ref(), "S2", &["AHU-1.SAT"]).len(), 2);
        assert!(f.job.run_site("S3").is_err());
    }

    #[test]
    fn failing_site_does_not_stop_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed(&store, &[DAY]);
        seed_point(&store, "bad/site", "AHU-1.SAT", &[DAY], 1.0);
        let job = ArchiveJob::new(
            ArchiveConfig::new(SITE, dir.path()).with_sites(["bad/site", SITE]),
            store.clone(),
            store.clone(),
            Arc::new(ParquetColdStore::new(dir.path())),
            Arc::new(ManualClock::new(20 * DAY)),
        )
        .unwrap();

        let cycle = job.run().unwrap();
        assert_eq!(cycle.failed.len(), 1);
        assert_eq!(cycle.failed[0].site, "bad/site");
        assert_eq!(cycle.site(SITE).unwrap().records, 1);
        assert_eq!(store.watermark("bad/site").unwrap(), None);
    }
}
