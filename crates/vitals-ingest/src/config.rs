//! Ingestion configuration.

use std::time::Duration;

use crate::error::{IngestError, Result};

/// Default sync window (10 minutes).
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Default sync interval (5 minutes).
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default page cap for a scheduled sync.
pub const DEFAULT_MAX_PAGES: usize = 50;

/// Default page cap for one backfill window.
pub const DEFAULT_BACKFILL_MAX_PAGES: usize = 1_000;

/// Default rows requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 5_000;

/// Site synced when none is configured.
pub const DEFAULT_SITE: &str = "building-vitals-hq";

/// Default FlightDeck API base URL.
pub const DEFAULT_SOURCE_BASE: &str = "https://flightdeck.aceiot.cloud/api";

/// Chunk-size schedule for persisting a batch.
///
/// The first size is used for a plain insert. When that fails the chunk is
/// split into the next size and upserted, and so on down the schedule. A
/// chunk that still fails at the last size is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WritePolicy {
    /// Chunk sizes, largest first.
    pub chunk_sizes: Vec<usize>,
    /// Attempts per chunk at each size for transient store errors.
    pub max_attempts: u32,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            chunk_sizes: vec![50, 10, 1],
            max_attempts: 2,
        }
    }
}

impl WritePolicy {
    /// Set the chunk-size schedule.
    #[must_use]
    pub fn with_chunk_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.chunk_sizes = sizes;
        self
    }

    /// Set the attempt bound.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Validates the policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule is empty, contains zero, grows, or
    /// the attempt bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_sizes.is_empty() {
            return Err(IngestError::InvalidConfig("chunk schedule is empty".into()));
        }
        if self.chunk_sizes.contains(&0) {
            return Err(IngestError::InvalidConfig("chunk size cannot be zero".into()));
        }
        if self.chunk_sizes.windows(2).any(|w| w[1] > w[0]) {
            return Err(IngestError::InvalidConfig(
                "chunk schedule must not grow".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(IngestError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Ingestion settings shared by every configured site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Sites to pull, in sync order.
    pub sites: Vec<String>,
    /// Length of the trailing window each sync covers.
    pub window: Duration,
    /// Schedule interval; shorter than `window` so windows overlap.
    pub interval: Duration,
    /// Page cap for a scheduled sync.
    pub max_pages: usize,
    /// Page cap for each backfill window.
    pub backfill_max_pages: usize,
    /// Rows requested per page.
    pub page_size: u32,
    /// Wall-clock budget for fetching one window.
    pub run_budget: Duration,
    /// Persistence policy.
    pub write_policy: WritePolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            sites: vec![DEFAULT_SITE.to_string()],
            window: DEFAULT_WINDOW,
            interval: DEFAULT_INTERVAL,
            max_pages: DEFAULT_MAX_PAGES,
            backfill_max_pages: DEFAULT_BACKFILL_MAX_PAGES,
            page_size: DEFAULT_PAGE_SIZE,
            run_budget: Duration::from_secs(4 * 60),
            write_policy: WritePolicy::default(),
        }
    }
}

impl IngestConfig {
    /// Creates a config for a single `site` with default settings.
    #[must_use]
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            sites: vec![site.into()],
            ..Self::default()
        }
    }

    /// Set the sites to pull.
    #[must_use]
    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = sites.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if `site` is one of the configured sites.
    #[must_use]
    pub fn has_site(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s == site)
    }

    /// Set the sync window.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the schedule interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the page cap.
    #[must_use]
    pub const fn with_max_pages(mut self, pages: usize) -> Self {
        self.max_pages = pages;
        self
    }

    /// Set the backfill page cap.
    #[must_use]
    pub const fn with_backfill_max_pages(mut self, pages: usize) -> Self {
        self.backfill_max_pages = pages;
        self
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    /// Set the per-window fetch budget.
    #[must_use]
    pub const fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    /// Set the write policy.
    #[must_use]
    pub fn with_write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistent setting.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(IngestError::InvalidConfig("at least one site is required".into()));
        }
        if self.sites.iter().any(|s| s.trim().is_empty()) {
            return Err(IngestError::InvalidConfig("site cannot be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.sites.iter().find(|s| !seen.insert(s.as_str())) {
            return Err(IngestError::InvalidConfig(format!("site {dup} is listed twice")));
        }
        if self.window.is_zero() {
            return Err(IngestError::InvalidConfig("window cannot be zero".into()));
        }
        if self.max_pages == 0 || self.backfill_max_pages == 0 {
            return Err(IngestError::InvalidConfig("page cap cannot be zero".into()));
        }
        if self.page_size == 0 {
            return Err(IngestError::InvalidConfig("page size cannot be zero".into()));
        }
        if self.run_budget.is_zero() {
            return Err(IngestError::InvalidConfig("run budget cannot be zero".into()));
        }
        self.write_policy.validate()
    }
}

/// Connection settings for the external paginated source.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// API base URL, without trailing slash.
    pub base_url: String,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for retryable failures.
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `base * 2^n`.
    pub retry_backoff: Duration,
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff", &self.retry_backoff)
            .finish()
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SOURCE_BASE.to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

impl SourceConfig {
    /// Set the base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the API key.
    #[must_use]
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry bound.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base.
    #[must_use]
    pub const fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}
