//! Splits a time range at the hot/cold boundary, reads both tiers
//! concurrently and merges the result.
//!
//! The hot tier serves `[max(start, cutoff), end)` and the cold tier serves
//! `[start, min(end, cutoff))`, where `cutoff = now - hot_boundary`. The two
//! ranges never overlap, so merging is a concatenation plus a sort.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};
use vitals_archive::ColdStore;
use vitals_store::{Clock, HotStore, NamedSample, TimeRange};

use crate::config::QueryConfig;
use crate::error::{QueryError, Result};
use crate::types::{
    ColdTierStats, HotTierStats, LatestRequest, LatestResponse, QualityResponse, QueryMetadata,
    QueryRequest, QueryResponse, SampleView, Tier, TierError,
};

/// Tier ranges for one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryPlan {
    /// `now - hot_boundary` at planning time.
    pub cutoff: i64,
    /// Hot-tier portion, if any.
    pub hot: Option<TimeRange>,
    /// Cold-tier portion, if any.
    pub cold: Option<TimeRange>,
}

impl QueryPlan {
    /// Splits `range` at `cutoff`.
    #[must_use]
    pub fn split(range: TimeRange, cutoff: i64) -> Self {
        let hot = (range.end > cutoff)
            .then(|| TimeRange {
                start: range.start.max(cutoff),
                end: range.end,
            })
            .filter(|r| !r.is_empty());
        let cold = (range.start < cutoff)
            .then(|| TimeRange {
                start: range.start,
                end: range.end.min(cutoff),
            })
            .filter(|r| !r.is_empty());
        Self { cutoff, hot, cold }
    }

    /// Tiers the plan reads from, hot first.
    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        let mut tiers = Vec::with_capacity(2);
        if self.hot.is_some() {
            tiers.push(Tier::Hot);
        }
        if self.cold.is_some() {
            tiers.push(Tier::Cold);
        }
        tiers
    }
}

type TierResult<T> = std::result::Result<T, String>;

/// Routes queries across the hot store and the cold store.
pub struct QueryRouter {
    config: QueryConfig,
    hot: Arc<dyn HotStore>,
    cold: Option<Arc<dyn ColdStore>>,
    clock: Arc<dyn Clock>,
}

impl QueryRouter {
    /// Creates a router. Without a cold store, cold portions come back
    /// empty with the gap reported in the response metadata.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidConfig` if the configuration is inconsistent.
    pub fn new(
        config: QueryConfig,
        hot: Arc<dyn HotStore>,
        cold: Option<Arc<dyn ColdStore>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            hot,
            cold,
            clock,
        })
    }

    /// Returns the router configuration.
    #[must_use]
    pub const fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Plans `range` against the current hot cutoff.
    #[must_use]
    pub fn plan(&self, range: TimeRange) -> QueryPlan {
        let cutoff = self.clock.now_millis() - self.config.hot_boundary.as_millis() as i64;
        QueryPlan::split(range, cutoff)
    }

    /// Runs a range query.
    ///
    /// A failing tier is reported in `metadata.errors` and the other tier's
    /// samples are still returned.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` for a rejected request and
    /// `QueryError::TiersFailed` when every tier the plan needed failed.
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = request.validate(&self.config, self.clock.now_millis())?;
        let plan = self.plan(query.range);
        debug!(
            site = %query.site,
            points = query.point_names.len(),
            range = %query.range,
            cutoff = plan.cutoff,
            tiers = ?plan.tiers(),
            "routing query"
        );

        let names: Arc<[String]> = query.point_names.clone().into();
        let hot_read = async {
            match plan.hot {
                Some(range) => Some(self.read_hot(&query.site, Arc::clone(&names), range).await),
                None => None,
            }
        };
        let cold_read = async {
            match plan.cold {
                Some(range) => Some(self.read_cold(&query.site, Arc::clone(&names), range).await),
                None => None,
            }
        };
        let (hot, cold) = tokio::join!(hot_read, cold_read);

        let mut samples = Vec::new();
        let mut metadata = QueryMetadata::default();
        let mut attempted = 0;
        let mut failed = 0;

        if let (Some(range), Some(result)) = (plan.hot, hot) {
            attempted += 1;
            match result {
                Ok(rows) => {
                    metadata.sources.push(Tier::Hot);
                    metadata.storage_tiers.hot = Some(HotTierStats {
                        start: range.start,
                        end: range.end,
                        sample_count: rows.len(),
                    });
                    samples.extend(rows);
                }
                Err(error) => {
                    failed += 1;
                    warn!(range = %range, error = %error, "hot tier read failed");
                    metadata.errors.push(TierError { tier: Tier::Hot, error });
                }
            }
        }

        if let (Some(range), Some(result)) = (plan.cold, cold) {
            match result {
                Ok(ColdOutcome::Read { samples: rows, file_count }) => {
                    attempted += 1;
                    metadata.sources.push(Tier::Cold);
                    metadata.storage_tiers.cold = Some(ColdTierStats {
                        start: range.start,
                        end: range.end,
                        file_count,
                    });
                    samples.extend(rows);
                }
                Ok(ColdOutcome::Unbound) => {
                    metadata.errors.push(TierError {
                        tier: Tier::Cold,
                        error: "cold storage is not configured".to_string(),
                    });
                }
                Err(error) => {
                    attempted += 1;
                    failed += 1;
                    warn!(range = %range, error = %error, "cold tier read failed");
                    metadata.errors.push(TierError { tier: Tier::Cold, error });
                }
            }
        }

        if attempted > 0 && failed == attempted {
            let detail = metadata
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.tier, e.error))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(QueryError::TiersFailed(detail));
        }

        merge(&mut samples);
        metadata.total_samples = samples.len();
        metadata.query_time_ms = started.elapsed().as_millis() as u64;
        debug!(
            samples = metadata.total_samples,
            sources = ?metadata.sources,
            query_time_ms = metadata.query_time_ms,
            "query finished"
        );

        Ok(QueryResponse {
            site_name: query.site,
            point_names: query.point_names,
            samples: samples.into_iter().map(SampleView::from).collect(),
            metadata,
        })
    }

    /// Returns the newest hot-store sample of each requested point.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` for a rejected request and
    /// `QueryError::TiersFailed` if the hot store fails.
    pub async fn latest(&self, request: &LatestRequest) -> Result<LatestResponse> {
        let (site, points) = request.validate(&self.config)?;
        let hot = Arc::clone(&self.hot);
        let read_site = site.clone();
        let samples = self
            .blocking(Tier::Hot, move || {
                hot.latest(&read_site, &points).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| QueryError::TiersFailed(format!("hot: {e}")))?;
        Ok(LatestResponse {
            site_name: site,
            samples,
        })
    }

    /// Summarizes sample quality per point over the requested range.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::Validation` for a rejected request and
    /// `QueryError::TiersFailed` if the hot store fails.
    pub async fn quality(&self, request: &QueryRequest) -> Result<QualityResponse> {
        let query = request.validate(&self.config, self.clock.now_millis())?;
        let hot = Arc::clone(&self.hot);
        let names = query.point_names;
        let range = query.range;
        let site = query.site.clone();
        let points = self
            .blocking(Tier::Hot, move || {
                hot.quality_summary(&site, &names, range).map_err(|e| e.to_string())
            })
            .await
            .map_err(|e| QueryError::TiersFailed(format!("hot: {e}")))?;
        Ok(QualityResponse {
            site_name: query.site,
            start_time: range.start,
            end_time: range.end,
            points,
        })
    }

    async fn read_hot(&self, site: &str, names: Arc<[String]>, range: TimeRange) -> TierResult<Vec<NamedSample>> {
        let hot = Arc::clone(&self.hot);
        let site = site.to_string();
        self.blocking(Tier::Hot, move || {
            hot.query_range(&site, &names, range).map_err(|e| e.to_string())
        })
        .await
    }

    async fn read_cold(&self, site: &str, names: Arc<[String]>, range: TimeRange) -> TierResult<ColdOutcome> {
        let Some(cold) = self.cold.as_ref().map(Arc::clone) else {
            return Ok(ColdOutcome::Unbound);
        };
        let site = site.to_string();
        self.blocking(Tier::Cold, move || {
            cold.read_range(&site, &names, range)
                .map(|read| ColdOutcome::Read {
                    samples: read.samples,
                    file_count: read.file_count,
                })
                .map_err(|e| e.to_string())
        })
        .await
    }

    /// Runs a storage read on the blocking pool within the query budget.
    async fn blocking<T, F>(&self, tier: Tier, read: F) -> TierResult<T>
    where
        F: FnOnce() -> TierResult<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.config.budget, tokio::task::spawn_blocking(read)).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) => Err(format!("{tier} read task failed: {join}")),
            Err(_) => Err(format!("{tier} read exceeded {:?}", self.config.budget)),
        }
    }
}

enum ColdOutcome {
    Read {
        samples: Vec<NamedSample>,
        file_count: usize,
    },
    Unbound,
}

/// Orders samples by timestamp, then point name.
fn merge(samples: &mut [NamedSample]) {
    samples.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.point_name.cmp(&b.point_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;
    use vitals_archive::MemoryColdStore;
    use vitals_store::{
        ManualClock, PartitionInfo, PointRegistry, QualitySummary, Sample, SqliteStore, StoreError,
        SweepOutcome,
    };

    const DAY: i64 = 86_400_000;
    const NOW: i64 = 100 * DAY;
    const CUTOFF: i64 = NOW - 20 * DAY;

    fn range(start: i64, end: i64) -> TimeRange {
        TimeRange::new(start, end).unwrap()
    }

    #[test_case(CUTOFF + 10, NOW, Some((CUTOFF + 10, NOW)), None ; "hot only")]
    #[test_case(CUTOFF, NOW, Some((CUTOFF, NOW)), None ; "starts at cutoff")]
    #[test_case(0, CUTOFF, None, Some((0, CUTOFF)) ; "ends at cutoff")]
    #[test_case(0, CUTOFF - 1, None, Some((0, CUTOFF - 1)) ; "cold only")]
    #[test_case(0, NOW, Some((CUTOFF, NOW)), Some((0, CUTOFF)) ; "spans both")]
    #[test_case(NOW, NOW, None, None ; "empty range")]
    fn plan_splits_at_cutoff(start: i64, end: i64, hot: Option<(i64, i64)>, cold: Option<(i64, i64)>) {
        let plan = QueryPlan::split(range(start, end), CUTOFF);
        assert_eq!(plan.hot, hot.map(|(s, e)| range(s, e)));
        assert_eq!(plan.cold, cold.map(|(s, e)| range(s, e)));
    }

    proptest! {
        #[test]
        fn plan_partitions_the_range(start in 0i64..200 * DAY, len in 0i64..200 * DAY, cutoff in 0i64..300 * DAY) {
            let requested = range(start, start + len);
            let plan = QueryPlan::split(requested, cutoff);
            let covered: i64 = [plan.hot, plan.cold]
                .iter()
                .flatten()
                .map(TimeRange::duration_millis)
                .sum();
            prop_assert_eq!(covered, requested.duration_millis());
            if let (Some(hot), Some(cold)) = (plan.hot, plan.cold) {
                prop_assert_eq!(cold.end, hot.start);
            }
        }
    }

    struct Fixture {
        store: Arc<SqliteStore>,
        cold: Arc<MemoryColdStore>,
        router: QueryRouter,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let cold = Arc::new(MemoryColdStore::new());
        let router = QueryRouter::new(
            QueryConfig::new("S1"),
            store.clone(),
            Some(cold.clone()),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();
        Fixture { store, cold, router }
    }

    fn seed_hot(store: &SqliteStore, name: &str, timestamps: &[i64]) {
        seed_hot_at(store, "S1", name, timestamps);
    }

    fn seed_hot_at(store: &SqliteStore, site: &str, name: &str, timestamps: &[i64]) {
        let id = store.resolve(site, name).unwrap();
        let samples: Vec<Sample> = timestamps
            .iter()
            .map(|ts| Sample::new(id, *ts, *ts as f64))
            .collect();
        store.upsert_samples(&samples).unwrap();
    }

    fn seed_cold(cold: &MemoryColdStore, name: &str, timestamps: &[i64]) {
        let samples: Vec<NamedSample> = timestamps
            .iter()
            .map(|ts| NamedSample::new(name, *ts, *ts as f64))
            .collect();
        cold.write_segment("S1", range(0, CUTOFF), &samples).unwrap();
    }

    #[tokio::test]
    async fn hot_only_query_reads_one_tier() {
        let f = fixture();
        let t = NOW - DAY;
        seed_hot(&f.store, "A", &[t - 500, t + 500]);

        let response = f
            .router
            .query(&QueryRequest::new("S1", &["A"], t - 1_000, t + 1_000))
            .await
            .unwrap();

        let timestamps: Vec<i64> = response.samples.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![t - 500, t + 500]);
        assert_eq!(response.metadata.sources, vec![Tier::Hot]);
        assert_eq!(response.metadata.total_samples, 2);
        assert!(response.metadata.storage_tiers.cold.is_none());
    }

    #[tokio::test]
    async fn cold_only_query_reads_one_tier() {
        let f = fixture();
        seed_cold(&f.cold, "A", &[DAY, 2 * DAY]);
        seed_hot(&f.store, "A", &[DAY + 1]);

        let response = f
            .router
            .query(&QueryRequest::new("S1", &["A"], 0, 10 * DAY))
            .await
            .unwrap();

        assert_eq!(response.metadata.sources, vec![Tier::Cold]);
        assert_eq!(response.samples.len(), 2);
        let cold = response.metadata.storage_tiers.cold.unwrap();
        assert_eq!((cold.start, cold.end, cold.file_count), (0, 10 * DAY, 1));
    }

    #[tokio::test]
    async fn spanning_query_merges_in_order() {
        let f = fixture();
        seed_cold(&f.cold, "A", &[CUTOFF - 2, CUTOFF - 1]);
        seed_hot(&f.store, "A", &[CUTOFF, CUTOFF + 5]);
        seed_hot(&f.store, "B", &[CUTOFF]);

        let response = f
            .router
            .query(&QueryRequest::new("S1", &["B", "A"], CUTOFF - 10, CUTOFF + 10))
            .await
            .unwrap();

        let got: Vec<(i64, &str)> = response
            .samples
            .iter()
            .map(|s| (s.timestamp, s.point_name.as_str()))
            .collect();
        assert_eq!(
            got,
            vec![
                (CUTOFF - 2, "A"),
                (CUTOFF - 1, "A"),
                (CUTOFF, "A"),
                (CUTOFF, "B"),
                (CUTOFF + 5, "A"),
            ]
        );
        assert_eq!(response.metadata.sources, vec![Tier::Hot, Tier::Cold]);
        assert_eq!(response.point_names, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn failing_cold_tier_is_reported_not_fatal() {
        let f = fixture();
        seed_hot(&f.store, "A", &[CUTOFF + 1]);
        f.cold.set_unavailable(true);

        let response = f
            .router
            .query(&QueryRequest::new("S1", &["A"], 0, NOW))
            .await
            .unwrap();

        assert_eq!(response.samples.len(), 1);
        assert_eq!(response.metadata.sources, vec![Tier::Hot]);
        assert_eq!(response.metadata.errors.len(), 1);
        assert_eq!(response.metadata.errors[0].tier, Tier::Cold);
    }

    #[tokio::test]
    async fn failing_only_tier_is_an_error() {
        let f = fixture();
        f.cold.set_unavailable(true);

        let err = f
            .router
            .query(&QueryRequest::new("S1", &["A"], 0, DAY))
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::TiersFailed(_)));
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn unbound_cold_tier_returns_hot_portion() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_hot(&store, "A", &[CUTOFF + 1]);
        let router = QueryRouter::new(
            QueryConfig::new("S1"),
            store,
            None,
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        let response = router
            .query(&QueryRequest::new("S1", &["A"], 0, NOW))
            .await
            .unwrap();
        assert_eq!(response.samples.len(), 1);
        assert_eq!(response.metadata.errors[0].error, "cold storage is not configured");

        let response = router
            .query(&QueryRequest::new("S1", &["A"], 0, DAY))
            .await
            .unwrap();
        assert!(response.samples.is_empty());
        assert!(response.metadata.sources.is_empty());
    }

    struct DownHot;

    fn down<T>() -> vitals_store::Result<T> {
        Err(StoreError::Unavailable("hot store offline".into()))
    }

    impl HotStore for DownHot {
        fn insert_samples(&self, _: &[Sample]) -> vitals_store::Result<usize> {
            down()
        }
        fn upsert_samples(&self, _: &[Sample]) -> vitals_store::Result<usize> {
            down()
        }
        fn query_range(&self, _: &str, _: &[String], _: TimeRange) -> vitals_store::Result<Vec<NamedSample>> {
            down()
        }
        fn scan_range(&self, _: &str, _: TimeRange) -> vitals_store::Result<Vec<NamedSample>> {
            down()
        }
        fn latest(&self, _: &str, _: &[String]) -> vitals_store::Result<Vec<NamedSample>> {
            down()
        }
        fn quality_summary(&self, _: &str, _: &[String], _: TimeRange) -> vitals_store::Result<Vec<QualitySummary>> {
            down()
        }
        fn earliest_timestamp(&self, _: Option<&str>) -> vitals_store::Result<Option<i64>> {
            down()
        }
        fn sample_count(&self) -> vitals_store::Result<u64> {
            down()
        }
        fn delete_before(&self, _: i64) -> vitals_store::Result<SweepOutcome> {
            down()
        }
        fn raw_partitions_before(&self, _: i64, _: i64) -> vitals_store::Result<Vec<TimeRange>> {
            down()
        }
        fn compress_partition(&self, _: TimeRange) -> vitals_store::Result<Option<PartitionInfo>> {
            down()
        }
        fn compressed_partitions(&self) -> vitals_store::Result<Vec<PartitionInfo>> {
            down()
        }
    }

    #[tokio::test]
    async fn failing_hot_tier_keeps_cold_portion() {
        let cold = Arc::new(MemoryColdStore::new());
        seed_cold(&cold, "A", &[DAY]);
        let router = QueryRouter::new(
            QueryConfig::new("S1"),
            Arc::new(DownHot),
            Some(cold),
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        let response = router
            .query(&QueryRequest::new("S1", &["A"], 0, NOW))
            .await
            .unwrap();
        assert_eq!(response.samples.len(), 1);
        assert_eq!(response.metadata.sources, vec![Tier::Cold]);
        assert_eq!(response.metadata.errors[0].tier, Tier::Hot);

        let err = router.latest(&LatestRequest::new("S1", &["A"])).await.unwrap_err();
        assert!(matches!(err, QueryError::TiersFailed(_)));
    }

    #[tokio::test]
    async fn validation_happens_before_storage() {
        let router = QueryRouter::new(
            QueryConfig::new("S1"),
            Arc::new(DownHot),
            None,
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        let err = router
            .query(&QueryRequest::new("S1", &["A"], NOW + 1, NOW + 2))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn latest_and_quality_read_the_hot_store() {
        let f = fixture();
        seed_hot(&f.store, "A", &[NOW - 3, NOW - 2, NOW - 1]);
        seed_hot(&f.store, "B", &[NOW - 10]);

        let latest = f
            .router
            .latest(&LatestRequest::new("S1", &["A", "B", "missing"]))
            .await
            .unwrap();
        let mut got: Vec<(String, i64)> = latest
            .samples
            .into_iter()
            .map(|s| (s.point_name, s.timestamp))
            .collect();
        got.sort();
        assert_eq!(got, vec![("A".to_string(), NOW - 1), ("B".to_string(), NOW - 10)]);

        let quality = f
            .router
            .quality(&QueryRequest::new("S1", &["A"], NOW - DAY, NOW))
            .await
            .unwrap();
        assert_eq!(quality.points.len(), 1);
        assert_eq!(quality.points[0].sample_count, 3);
        assert_eq!(quality.start_time, NOW - DAY);
    }

    #[tokio::test]
    async fn every_configured_site_is_served_separately() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        seed_hot_at(&store, "S1", "A", &[NOW - 2]);
        seed_hot_at(&store, "S2", "A", &[NOW - 1]);
        let router = QueryRouter::new(
            QueryConfig::default().with_sites(["S1", "S2"]),
            store,
            None,
            Arc::new(ManualClock::new(NOW)),
        )
        .unwrap();

        for (site, ts) in [("S1", NOW - 2), ("S2", NOW - 1)] {
            let response = router
                .query(&QueryRequest::new(site, &["A"], NOW - DAY, NOW))
                .await
                .unwrap();
            assert_eq!(response.site_name, site);
            let timestamps: Vec<i64> = response.samples.iter().map(|s| s.timestamp).collect();
            assert_eq!(timestamps, vec![ts]);
        }

        let err = router
            .query(&QueryRequest::new("S3", &["A"], NOW - DAY, NOW))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
