//! Retention sweep for the hot store.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::clock::Clock;
use crate::error::Result;
use crate::traits::HotStore;
use crate::types::SweepOutcome;

/// Default retention horizon (30 days).
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Default sweep interval (1 hour).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Retention settings for the hot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionConfig {
    /// Samples older than this are removed.
    pub retention: Duration,
    /// How often the sweep runs.
    pub interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RetentionConfig {
    /// Set the retention horizon.
    #[must_use]
    pub const fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the sweep interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the retention horizon in milliseconds.
    #[must_use]
    pub const fn retention_millis(&self) -> i64 {
        self.retention.as_millis() as i64
    }
}

/// Deletes samples that have aged past the retention horizon.
pub struct RetentionSweeper {
    config: RetentionConfig,
    store: Arc<dyn HotStore>,
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    /// Creates a sweeper over `store`.
    #[must_use]
    pub fn new(config: RetentionConfig, store: Arc<dyn HotStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Returns the sweeper configuration.
    #[must_use]
    pub const fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Removes everything older than `now - retention`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    pub fn sweep(&self) -> Result<SweepOutcome> {
        let cutoff = self.clock.now_millis() - self.config.retention_millis();
        let outcome = self.store.delete_before(cutoff)?;
        info!(
            cutoff,
            rows_deleted = outcome.rows_deleted,
            partitions_deleted = outcome.partitions_deleted,
            "retention sweep finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sqlite::SqliteStore;
    use crate::traits::PointRegistry;
    use crate::types::{Sample, TimeRange};

    const DAY: i64 = 86_400_000;

    #[test]
    fn default_config() {
        let config = RetentionConfig::default();
        assert_eq!(config.retention_millis(), 30 * DAY);
        assert_eq!(config.interval, Duration::from_secs(3_600));
    }

    #[test]
    fn builder_overrides() {
        let config = RetentionConfig::default()
            .with_retention(Duration::from_secs(60))
            .with_interval(Duration::from_secs(5));
        assert_eq!(config.retention_millis(), 60_000);
        assert_eq!(config.interval, Duration::from_secs(5));
    }

    #[test]
    fn sweep_removes_only_expired_samples() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store.resolve("hq", "AHU-1.SAT").unwrap();
        store
            .upsert_samples(&[
                Sample::new(id, DAY, 1.0),
                Sample::new(id, 10 * DAY, 2.0),
                Sample::new(id, 35 * DAY, 3.0),
            ])
            .unwrap();

        let clock = Arc::new(ManualClock::new(40 * DAY));
        let sweeper = RetentionSweeper::new(RetentionConfig::default(), store.clone(), clock.clone());

        let outcome = sweeper.sweep().unwrap();
        assert_eq!(outcome.cutoff, 10 * DAY);
        assert_eq!(outcome.rows_deleted, 1);
        assert_eq!(store.sample_count().unwrap(), 2);

        clock.advance(Duration::from_secs(24 * 60 * 60));
        let outcome = sweeper.sweep().unwrap();
        assert_eq!(outcome.rows_deleted, 1);
        assert_eq!(store.earliest_timestamp(None).unwrap(), Some(35 * DAY));
    }

    #[test]
    fn sweep_includes_compressed_partitions() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let id = store.resolve("hq", "p").unwrap();
        store
            .upsert_samples(&[Sample::new(id, 10, 1.0), Sample::new(id, 2 * DAY, 1.0)])
            .unwrap();
        store
            .compress_partition(TimeRange::new(0, DAY).unwrap())
            .unwrap();

        let clock = Arc::new(ManualClock::new(DAY + 1));
        let config = RetentionConfig::default().with_retention(Duration::from_millis(1));
        let outcome = RetentionSweeper::new(config, store.clone(), clock).sweep().unwrap();
        assert_eq!(outcome.partitions_deleted, 1);
        assert_eq!(store.sample_count().unwrap(), 1);
    }
}
