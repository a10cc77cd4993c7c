//! Shared fixtures for end-to-end tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use vitals_archive::{ArchiveConfig, ArchiveJob, ColdStore, CompressionConfig, CompressionJob, ParquetColdStore};
use vitals_ingest::{IngestConfig, IngestPipeline, SampleSource, StaticSource};
use vitals_query::{QueryConfig, QueryRouter};
use vitals_store::{ManualClock, RetentionConfig, RetentionSweeper, SqliteStore};

/// Site used throughout the tests.
pub const SITE: &str = "S1";

/// One day in milliseconds.
pub const DAY: i64 = 86_400_000;

/// One hour in milliseconds.
pub const HOUR: i64 = 3_600_000;

/// Start of the simulated timeline.
pub const EPOCH: i64 = 1_700_000_000_000;

/// A source row in the external wire format.
pub fn row(name: &str, time: i64, value: f64) -> Value {
    json!({"name": name, "time": time, "value": value})
}

/// A deployment on disk with a controllable clock.
pub struct Harness {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub cold: Arc<ParquetColdStore>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteStore::open(dir.path().join("vitals.db")).unwrap());
        let cold = Arc::new(ParquetColdStore::new(dir.path().join("cold")));
        Self {
            dir,
            store,
            cold,
            clock: Arc::new(ManualClock::new(EPOCH)),
        }
    }

    pub fn now(&self) -> i64 {
        use vitals_store::Clock;
        self.clock.now_millis()
    }

    pub fn advance(&self, millis: i64) {
        self.clock.set(self.now() + millis);
    }

    pub fn pipeline(&self, source: Arc<dyn SampleSource>) -> IngestPipeline {
        IngestPipeline::new(
            IngestConfig::new(SITE),
            source,
            self.store.clone(),
            self.store.clone(),
            self.clock.clone(),
        )
        .unwrap()
    }

    /// Ingests `rows` as a single page over the trailing window.
    pub async fn ingest(&self, rows: Vec<Value>) -> vitals_ingest::IngestReport {
        self.pipeline(Arc::new(StaticSource::single_page(rows)))
            .sync_site(SITE)
            .await
            .unwrap()
    }

    pub fn archive_job(&self, cold: Arc<dyn ColdStore>) -> ArchiveJob {
        ArchiveJob::new(
            ArchiveConfig::new(SITE, self.dir.path().join("cold")).with_max_segment(Duration::from_secs(86_400)),
            self.store.clone(),
            self.store.clone(),
            cold,
            self.clock.clone(),
        )
        .unwrap()
    }

    pub fn compression_job(&self) -> CompressionJob {
        CompressionJob::new(CompressionConfig::default(), self.store.clone(), self.clock.clone()).unwrap()
    }

    pub fn sweeper(&self) -> RetentionSweeper {
        RetentionSweeper::new(RetentionConfig::default(), self.store.clone(), self.clock.clone())
    }

    pub fn router(&self) -> QueryRouter {
        QueryRouter::new(
            QueryConfig::new(SITE),
            self.store.clone(),
            Some(self.cold.clone()),
            self.clock.clone(),
        )
        .unwrap()
    }
}
