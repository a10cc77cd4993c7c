//! Shared service state: storage handles, jobs and the query router.

use std::sync::Arc;
use std::time::{Duration, Instant};

use vitals_archive::{
    ArchiveCycleReport, ArchiveJob, ColdStore, CompressionJob, CompressionReport, ParquetColdStore,
};
use vitals_ingest::{BackfillReport, HttpSource, IngestPipeline, SampleSource, SyncReport};
use vitals_query::QueryRouter;
use vitals_store::{Clock, RetentionSweeper, SqliteStore, SweepOutcome, SystemClock, TimeRange};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};

/// Everything the HTTP handlers, scheduler and CLI commands share.
pub struct AppState {
    config: ServerConfig,
    store: Arc<SqliteStore>,
    source: Option<Arc<dyn SampleSource>>,
    clock: Arc<dyn Clock>,
    router: QueryRouter,
    archive: Arc<ArchiveJob>,
    compression: Arc<CompressionJob>,
    sweeper: Arc<RetentionSweeper>,
    started: Instant,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("sites", &self.config.sites())
            .field("database", &self.config.database)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Opens the configured hot store and cold directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn open(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SqliteStore::open(&config.database)?);
        let cold = Arc::new(ParquetColdStore::new(config.archive.root.clone()));
        Self::from_parts(config, store, cold, None, Arc::new(SystemClock))
    }

    /// Assembles state from explicit parts.
    ///
    /// Without a `source`, each sync run builds an HTTP client from the
    /// source settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_parts(
        config: ServerConfig,
        store: Arc<SqliteStore>,
        cold: Arc<dyn ColdStore>,
        source: Option<Arc<dyn SampleSource>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let router = QueryRouter::new(
            config.query.clone(),
            store.clone(),
            Some(Arc::clone(&cold)),
            Arc::clone(&clock),
        )?;
        let archive = ArchiveJob::new(
            config.archive.clone(),
            store.clone(),
            store.clone(),
            cold,
            Arc::clone(&clock),
        )?;
        let compression = CompressionJob::new(config.compression, store.clone(), Arc::clone(&clock))?;
        let sweeper = RetentionSweeper::new(config.retention, store.clone(), Arc::clone(&clock));

        Ok(Self {
            config,
            store,
            source,
            clock,
            router,
            archive: Arc::new(archive),
            compression: Arc::new(compression),
            sweeper: Arc::new(sweeper),
            started: Instant::now(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the hot store.
    #[must_use]
    pub fn store(&self) -> Arc<SqliteStore> {
        Arc::clone(&self.store)
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns the query router.
    #[must_use]
    pub const fn router(&self) -> &QueryRouter {
        &self.router
    }

    /// Returns the time since the state was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Builds an ingestion pipeline for one run.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingCredentials` (wrapped) when no source is
    /// injected and no API key is configured.
    pub fn pipeline(&self) -> Result<IngestPipeline> {
        let source: Arc<dyn SampleSource> = match &self.source {
            Some(source) => Arc::clone(source),
            None => Arc::new(HttpSource::new(self.config.source.clone())?),
        };
        Ok(IngestPipeline::new(
            self.config.ingest.clone(),
            source,
            self.store.clone(),
            self.store.clone(),
            Arc::clone(&self.clock),
        )?)
    }

    /// Syncs the trailing window of every site.
    ///
    /// # Errors
    ///
    /// Returns an error if the run aborts or every site fails.
    pub async fn sync(&self) -> Result<SyncReport> {
        Ok(self.pipeline()?.sync().await?)
    }

    /// Backfills `range` of `site` in windows of `chunk`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown site or if the walk aborts on a
    /// fatal condition.
    pub async fn backfill(&self, site: &str, range: TimeRange, chunk: Duration) -> Result<BackfillReport> {
        Ok(self.pipeline()?.backfill(site, range, chunk).await?)
    }

    /// Exports aged samples of every site to cold storage.
    ///
    /// # Errors
    ///
    /// Returns an error if every site's export fails.
    pub async fn archive(&self) -> Result<ArchiveCycleReport> {
        let job = Arc::clone(&self.archive);
        Ok(blocking(move || job.run()).await??)
    }

    /// Compresses aged hot partitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn compress(&self) -> Result<CompressionReport> {
        let job = Arc::clone(&self.compression);
        Ok(blocking(move || job.run()).await??)
    }

    /// Removes samples beyond the retention horizon.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        let sweeper = Arc::clone(&self.sweeper);
        Ok(blocking(move || sweeper.sweep()).await??)
    }
}

async fn blocking<T, F>(job: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ServerError::Task(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitals_archive::MemoryColdStore;
    use vitals_ingest::StaticSource;
    use vitals_store::{HotStore, ManualClock};

    const DAY: i64 = 86_400_000;

    fn state(source: Option<Arc<dyn SampleSource>>) -> AppState {
        AppState::from_parts(
            ServerConfig::default(),
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(MemoryColdStore::new()),
            source,
            Arc::new(ManualClock::new(40 * DAY)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn missing_credentials_abort_sync() {
        let state = state(None);
        let err = state.sync().await.unwrap_err();
        assert!(matches!(err, ServerError::Ingest(ref e) if e.is_fatal()), "{err}");
    }

    #[tokio::test]
    async fn sync_uses_injected_source() {
        let rows = vec![serde_json::json!({"name": "A", "time": 40 * DAY - 1_000, "value": 1.5})];
        let state = state(Some(Arc::new(StaticSource::single_page(rows))));

        let report = state.sync().await.unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(state.store().sample_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn maintenance_jobs_run_on_empty_store() {
        let state = state(None);
        let archived = state.archive().await.unwrap();
        assert_eq!(archived.sites.len(), 1);
        assert!(archived.sites[0].segments.is_empty());
        assert!(state.compress().await.unwrap().partitions.is_empty());
        assert_eq!(state.sweep().await.unwrap(), SweepOutcome::default());
    }

    #[tokio::test]
    async fn backfill_refuses_unconfigured_site() {
        let state = state(Some(Arc::new(StaticSource::single_page(vec![]))));
        let range = TimeRange::new(DAY, 2 * DAY).unwrap();
        let err = state
            .backfill("elsewhere", range, Duration::from_secs(600))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Ingest(_)), "{err}");
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ServerConfig::default().with_ingest(vitals_ingest::IngestConfig::new("other"));
        let result = AppState::from_parts(
            config,
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(MemoryColdStore::new()),
            None,
            Arc::new(ManualClock::new(0)),
        );
        assert!(result.is_err());
    }
}
