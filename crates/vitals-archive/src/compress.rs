//! In-place compression of aged hot-store partitions.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};
use vitals_store::{Clock, HotStore, PartitionInfo, StoreError};

use crate::config::CompressionConfig;
use crate::error::Result;

/// Summary of a compression run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompressionReport {
    /// Partitions compressed by this run.
    pub partitions: Vec<PartitionInfo>,
    /// Partitions skipped because they overlap an already compressed one.
    pub skipped: usize,
    /// Samples moved into compressed form.
    pub rows: u64,
    /// Column-encoded size before compression.
    pub raw_bytes: u64,
    /// Size after compression.
    pub compressed_bytes: u64,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl CompressionReport {
    /// Returns the overall raw-to-compressed ratio.
    #[must_use]
    pub fn compression_ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 0.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Compresses every whole partition older than the compression boundary.
pub struct CompressionJob {
    config: CompressionConfig,
    store: Arc<dyn HotStore>,
    clock: Arc<dyn Clock>,
}

impl CompressionJob {
    /// Creates a job.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` on a zero partition width.
    pub fn new(config: CompressionConfig, store: Arc<dyn HotStore>, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, store, clock })
    }

    /// Returns the job configuration.
    #[must_use]
    pub const fn config(&self) -> &CompressionConfig {
        &self.config
    }

    /// Compresses eligible partitions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns the first store failure other than an overlap with an
    /// existing compressed partition.
    pub fn run(&self) -> Result<CompressionReport> {
        let started = Instant::now();
        let cutoff = self.clock.now_millis() - self.config.compress_after.as_millis() as i64;
        let width = self.config.partition_width.as_millis() as i64;

        let mut report = CompressionReport::default();
        for partition in self.store.raw_partitions_before(cutoff, width)? {
            match self.store.compress_partition(partition) {
                Ok(Some(info)) => {
                    report.rows += info.row_count;
                    report.raw_bytes += info.raw_bytes;
                    report.compressed_bytes += info.compressed_bytes;
                    report.partitions.push(info);
                }
                Ok(None) => {}
                Err(StoreError::ImmutablePartition { partition_start }) => {
                    warn!(
                        partition = %partition,
                        overlaps = partition_start,
                        "partition overlaps a compressed partition, skipping"
                    );
                    report.skipped += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            partitions = report.partitions.len(),
            skipped = report.skipped,
            rows = report.rows,
            ratio = report.compression_ratio(),
            duration_ms = report.duration_ms,
            "compression run finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vitals_store::{ManualClock, PointRegistry, Sample, SqliteStore, TimeRange};

    const DAY: i64 = 86_400_000;
    const MINUTE: i64 = 60_000;

    fn seed_days(store: &SqliteStore, days: std::ops::Range<i64>) {
        let id = store.resolve("hq", "AHU-1.SupplyTemp").unwrap();
        for day in days {
            let samples: Vec<Sample> = (0..1_440)
                .map(|m| Sample::new(id, day * DAY + m * MINUTE, 21.5))
                .collect();
            store.upsert_samples(&samples).unwrap();
        }
    }

    #[test]
    fn compresses_only_aged_whole_partitions() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_days(&store, 0..10);
        let clock = Arc::new(ManualClock::new(10 * DAY + 12 * 60 * MINUTE));
        let job = CompressionJob::new(CompressionConfig::default(), store.clone(), clock).unwrap();

        let report = job.run().unwrap();
        // Cutoff is day 3.5: days 0, 1 and 2 are whole and old enough.
        assert_eq!(report.partitions.len(), 3);
        assert_eq!(report.rows, 3 * 1_440);
        assert!(report.compression_ratio() > 10.0, "ratio {}", report.compression_ratio());

        assert_eq!(store.sample_count().unwrap(), 10 * 1_440);
        let rows = store
            .query_range("hq", &["AHU-1.SupplyTemp".to_string()], TimeRange::new(0, 10 * DAY).unwrap())
            .unwrap();
        assert_eq!(rows.len(), 10 * 1_440);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn second_run_is_a_noop() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_days(&store, 0..3);
        let clock = Arc::new(ManualClock::new(30 * DAY));
        let job = CompressionJob::new(CompressionConfig::default(), store.clone(), clock).unwrap();

        assert_eq!(job.run().unwrap().partitions.len(), 3);
        let again = job.run().unwrap();
        assert!(again.partitions.is_empty());
        assert_eq!(store.compressed_partitions().unwrap().len(), 3);
    }

    #[test]
    fn width_change_skips_overlaps() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_days(&store, 0..2);

        // Cutoff just past day 0: only day 0 is compressed.
        let early = Arc::new(ManualClock::new(8 * DAY + 1));
        let first = CompressionJob::new(CompressionConfig::default(), store.clone(), early)
            .unwrap()
            .run()
            .unwrap();
        assert_eq!(first.partitions.len(), 1);

        // Two-day partitions now cover day 0 again.
        let late = Arc::new(ManualClock::new(30 * DAY));
        let config = CompressionConfig::default().with_partition_width(Duration::from_secs(2 * 86_400));
        let second = CompressionJob::new(config, store.clone(), late).unwrap().run().unwrap();
        assert!(second.partitions.is_empty());
        assert_eq!(second.skipped, 1);
        assert_eq!(store.compressed_partitions().unwrap().len(), 1);
    }
}
