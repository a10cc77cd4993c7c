//! Sync and backfill runs.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};
use vitals_store::{Clock, HotStore, PointId, PointRegistry, Sample, TimeRange};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::parser::{parse_rows, ParsedRow};
use crate::source::{PageRequest, SampleSource};
use crate::writer::ChunkWriter;

/// Summary of one site's sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Site pulled.
    pub site: String,
    /// Window covered.
    pub window: Option<TimeRange>,
    /// Pages fetched.
    pub pages: usize,
    /// Raw rows received.
    pub rows_seen: usize,
    /// Rows dropped by the parser.
    pub rows_skipped: usize,
    /// Distinct point names in the parsed rows.
    pub unique_points: usize,
    /// Points created by this run.
    pub points_created: usize,
    /// Rows whose point could not be resolved.
    pub unresolved: usize,
    /// Rows dropped as in-batch duplicates.
    pub duplicates_removed: usize,
    /// Rows persisted.
    pub written: usize,
    /// Rows skipped after exhausting the write policy.
    pub rejected: usize,
    /// True if the page cap or fetch budget stopped pagination early.
    pub truncated: bool,
    /// Source failure after the first page; fetched pages were still persisted.
    pub source_error: Option<String>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// A site whose sync failed outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SiteFailure {
    /// The site.
    pub site: String,
    /// What went wrong.
    pub error: String,
}

/// Summary of one sync cycle over every configured site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Reports of the sites that synced.
    pub sites: Vec<IngestReport>,
    /// Sites whose sync failed.
    pub failed: Vec<SiteFailure>,
    /// Rows persisted across all sites.
    pub written: usize,
    /// Rows skipped across all sites.
    pub rejected: usize,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

impl SyncReport {
    /// Returns the report of `site`, if it synced.
    #[must_use]
    pub fn site(&self, site: &str) -> Option<&IngestReport> {
        self.sites.iter().find(|r| r.site == site)
    }
}

/// A backfill window whose sync failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedWindow {
    /// The window.
    pub window: TimeRange,
    /// What went wrong.
    pub error: String,
}

/// Summary of a backfill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillReport {
    /// Site pulled.
    pub site: String,
    /// Overall range.
    pub range: Option<TimeRange>,
    /// Windows attempted.
    pub windows: usize,
    /// Pages fetched across all windows.
    pub pages: usize,
    /// Raw rows received.
    pub rows_seen: usize,
    /// Rows persisted.
    pub written: usize,
    /// Rows skipped after exhausting the write policy.
    pub rejected: usize,
    /// Windows that failed.
    pub failed_windows: Vec<FailedWindow>,
    /// Wall-clock duration.
    pub duration_ms: u64,
}

/// Counts from the persistence half of a run.
#[derive(Debug, Default)]
struct PersistCounts {
    unique_points: usize,
    points_created: usize,
    unresolved: usize,
    duplicates_removed: usize,
    written: usize,
    rejected: usize,
}

/// Pulls the configured sites' samples from a source into the hot store.
pub struct IngestPipeline {
    config: IngestConfig,
    source: Arc<dyn SampleSource>,
    registry: Arc<dyn PointRegistry>,
    store: Arc<dyn HotStore>,
    clock: Arc<dyn Clock>,
}

impl IngestPipeline {
    /// Creates a pipeline.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidConfig` if the configuration is inconsistent.
    pub fn new(
        config: IngestConfig,
        source: Arc<dyn SampleSource>,
        registry: Arc<dyn PointRegistry>,
        store: Arc<dyn HotStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            registry,
            store,
            clock,
        })
    }

    /// Returns the pipeline configuration.
    #[must_use]
    pub const fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Syncs the trailing window of every configured site, in order.
    ///
    /// A site that fails is recorded in [`SyncReport::failed`] and the cycle
    /// moves on to the next one.
    ///
    /// # Errors
    ///
    /// Returns a fatal error as soon as it occurs, or the first site's error
    /// if no site synced.
    pub async fn sync(&self) -> Result<SyncReport> {
        let started = Instant::now();
        let mut report = SyncReport::default();
        let mut first_error = None;

        for site in &self.config.sites {
            match self.sync_site(site).await {
                Ok(site_report) => {
                    report.written += site_report.written;
                    report.rejected += site_report.rejected;
                    report.sites.push(site_report);
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(site = %site, error = %err, "site sync failed, continuing with next site");
                    report.failed.push(SiteFailure {
                        site: site.clone(),
                        error: err.to_string(),
                    });
                    first_error.get_or_insert(err);
                }
            }
        }

        if report.sites.is_empty() {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            sites = report.sites.len(),
            failed = report.failed.len(),
            written = report.written,
            rejected = report.rejected,
            duration_ms = report.duration_ms,
            "sync cycle finished"
        );
        Ok(report)
    }

    /// Syncs the trailing window `[now - window, now)` of one site.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidConfig` for a site that is not configured,
    /// or `IngestError::SourceUnavailable` if the first page cannot be fetched.
    pub async fn sync_site(&self, site: &str) -> Result<IngestReport> {
        let now = self.clock.now_millis();
        let window = TimeRange::new(now - self.config.window.as_millis() as i64, now)?;
        self.sync_window(site, window, self.config.max_pages).await
    }

    /// Syncs an explicit window of one site with the given page cap.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::InvalidConfig` for a site that is not configured,
    /// `IngestError::SourceUnavailable` if the first page cannot be fetched,
    /// or `IngestError::Task` if persistence panicked.
    pub async fn sync_window(
        &self,
        site: &str,
        window: TimeRange,
        max_pages: usize,
    ) -> Result<IngestReport> {
        self.ensure_site(site)?;
        let started = Instant::now();
        let site = site.to_string();
        info!(site = %site, window = %window, "starting sync");

        let mut report = IngestReport {
            site: site.clone(),
            window: Some(window),
            ..IngestReport::default()
        };

        let mut rows = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            if report.pages >= max_pages {
                warn!(site = %site, pages = report.pages, "page cap reached");
                report.truncated = true;
                break;
            }
            let Some(remaining) = self.config.run_budget.checked_sub(started.elapsed()) else {
                warn!(site = %site, pages = report.pages, "fetch budget exhausted");
                report.truncated = true;
                break;
            };

            let request = PageRequest {
                site: site.clone(),
                window,
                page_size: self.config.page_size,
                cursor: cursor.clone(),
            };
            let fetched = match tokio::time::timeout(remaining, self.source.fetch_page(&request)).await {
                Ok(result) => result,
                Err(_) => Err(IngestError::SourceUnavailable(format!(
                    "fetch budget of {:?} exhausted",
                    self.config.run_budget
                ))),
            };

            match fetched {
                Ok(page) => {
                    report.pages += 1;
                    report.rows_seen += page.rows.len();
                    let parsed = parse_rows(&page.rows);
                    report.rows_skipped += parsed.skipped;
                    rows.extend(parsed.rows);
                    match page.next_cursor {
                        Some(next) => cursor = Some(next),
                        None => break,
                    }
                }
                Err(err) if report.pages == 0 => {
                    warn!(site = %site, error = %err, "source unavailable, aborting run");
                    return Err(err);
                }
                Err(err) => {
                    warn!(site = %site, pages = report.pages, error = %err, "source failed mid-run, keeping fetched pages");
                    report.source_error = Some(err.to_string());
                    break;
                }
            }
        }

        let counts = self.persist(&site, rows).await?;
        report.unique_points = counts.unique_points;
        report.points_created = counts.points_created;
        report.unresolved = counts.unresolved;
        report.duplicates_removed = counts.duplicates_removed;
        report.written = counts.written;
        report.rejected = counts.rejected;
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            site = %report.site,
            pages = report.pages,
            rows_seen = report.rows_seen,
            rows_skipped = report.rows_skipped,
            unique_points = report.unique_points,
            points_created = report.points_created,
            unresolved = report.unresolved,
            duplicates_removed = report.duplicates_removed,
            written = report.written,
            rejected = report.rejected,
            duration_ms = report.duration_ms,
            "sync finished"
        );
        Ok(report)
    }

    /// Syncs `range` of one site in windows of `chunk`, newest first.
    ///
    /// A window whose fetch fails is recorded and the walk continues. Rows
    /// older than the site's archive watermark are picked up by the next
    /// archive run, except rows that fall into a compressed partition, which
    /// are counted as rejected.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown site or a zero chunk, or for a fatal
    /// error that would fail every window.
    pub async fn backfill(
        &self,
        site: &str,
        range: TimeRange,
        chunk: Duration,
    ) -> Result<BackfillReport> {
        self.ensure_site(site)?;
        let chunk_ms = chunk.as_millis() as i64;
        if chunk_ms <= 0 {
            return Err(IngestError::InvalidConfig("backfill chunk cannot be zero".into()));
        }
        let started = Instant::now();
        let mut report = BackfillReport {
            site: site.to_string(),
            range: Some(range),
            ..BackfillReport::default()
        };
        info!(site = %report.site, range = %range, chunk_ms, "starting backfill");

        let mut end = range.end;
        while end > range.start {
            let start = (end - chunk_ms).max(range.start);
            let window = TimeRange { start, end };
            report.windows += 1;

            match self.sync_window(site, window, self.config.backfill_max_pages).await {
                Ok(window_report) => {
                    report.pages += window_report.pages;
                    report.rows_seen += window_report.rows_seen;
                    report.written += window_report.written;
                    report.rejected += window_report.rejected;
                    if let Some(error) = window_report.source_error {
                        report.failed_windows.push(FailedWindow { window, error });
                    }
                }
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(window = %window, error = %err, "backfill window failed");
                    report.failed_windows.push(FailedWindow {
                        window,
                        error: err.to_string(),
                    });
                }
            }
            end = start;
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        info!(
            site = %report.site,
            windows = report.windows,
            failed = report.failed_windows.len(),
            written = report.written,
            duration_ms = report.duration_ms,
            "backfill finished"
        );
        Ok(report)
    }

    fn ensure_site(&self, site: &str) -> Result<()> {
        if !self.config.has_site(site) {
            return Err(IngestError::InvalidConfig(format!("site {site} is not configured")));
        }
        Ok(())
    }

    async fn persist(&self, site: &str, rows: Vec<ParsedRow>) -> Result<PersistCounts> {
        if rows.is_empty() {
            return Ok(PersistCounts::default());
        }
        let registry = Arc::clone(&self.registry);
        let store = Arc::clone(&self.store);
        let policy = self.config.write_policy.clone();
        let site = site.to_string();
        tokio::task::spawn_blocking(move || {
            persist_rows(registry.as_ref(), store.as_ref(), &policy, &site, rows)
        })
        .await
        .map_err(|e| IngestError::Task(e.to_string()))
    }
}

/// Resolves, deduplicates and writes parsed rows of one site.
fn persist_rows(
    registry: &dyn PointRegistry,
    store: &dyn HotStore,
    policy: &crate::config::WritePolicy,
    site: &str,
    rows: Vec<ParsedRow>,
) -> PersistCounts {
    let mut counts = PersistCounts::default();

    let names: Vec<String> = rows
        .iter()
        .map(|r| r.point_name.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    counts.unique_points = names.len();

    let ids: HashMap<String, PointId> = match registry.bulk_resolve(site, &names) {
        Ok(resolution) => {
            counts.points_created = resolution.created;
            resolution.ids
        }
        Err(err) => {
            warn!(site, rows = rows.len(), points = names.len(), error = %err, "registry unavailable, dropping batch");
            counts.unresolved = rows.len();
            return counts;
        }
    };

    // Last write wins within the batch.
    let mut latest: HashMap<(PointId, i64), Sample> = HashMap::with_capacity(rows.len());
    let mut resolved = 0usize;
    for row in rows {
        let Some(&point_id) = ids.get(&row.point_name) else {
            debug!(point = %row.point_name, "dropping sample for unresolved point");
            counts.unresolved += 1;
            continue;
        };
        resolved += 1;
        let sample = Sample::new(point_id, row.timestamp, row.value)
            .with_quality(row.quality)
            .with_flags(row.flags);
        latest.insert((point_id, row.timestamp), sample);
    }
    counts.duplicates_removed = resolved - latest.len();

    let mut samples: Vec<Sample> = latest.into_values().collect();
    samples.sort_by_key(|s| (s.point_id, s.timestamp));

    let outcome = ChunkWriter::new(store, policy).write(&samples);
    counts.written = outcome.written;
    counts.rejected = outcome.rejected;
    counts
}
