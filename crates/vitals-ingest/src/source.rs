//! Paginated sample sources.
//!
//! [`SampleSource`] is the port the pipeline pulls from. [`HttpSource`] talks
//! to the FlightDeck API; [`StaticSource`] serves canned pages for tests and
//! dry runs.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use vitals_store::TimeRange;

use crate::config::SourceConfig;
use crate::error::{IngestError, Result};

/// One page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// Site to read.
    pub site: String,
    /// Window `[start, end)` in epoch milliseconds.
    pub window: TimeRange,
    /// Rows per page.
    pub page_size: u32,
    /// Cursor from the previous page.
    pub cursor: Option<String>,
}

/// One page of raw rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourcePage {
    /// Raw rows, decoded individually by the parser.
    pub rows: Vec<serde_json::Value>,
    /// Cursor for the next page; `None` when exhausted.
    pub next_cursor: Option<String>,
}

/// Wire shape of a paginated response.
#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    point_samples: Vec<serde_json::Value>,
    #[serde(default)]
    next_cursor: Option<String>,
}

impl From<PageResponse> for SourcePage {
    fn from(response: PageResponse) -> Self {
        Self {
            rows: response.point_samples,
            next_cursor: response.next_cursor.filter(|c| !c.is_empty()),
        }
    }
}

/// A paginated source of raw sample rows.
pub trait SampleSource: Send + Sync {
    /// Fetches one page.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::SourceUnavailable` once retries are exhausted.
    fn fetch_page<'a>(
        &'a self,
        request: &'a PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SourcePage>> + Send + 'a>>;
}

/// Formats epoch milliseconds as RFC 3339 with a `Z` suffix.
#[must_use]
pub fn format_millis(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map_or_else(|| ms.to_string(), |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn is_retryable(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// FlightDeck paginated timeseries client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    config: SourceConfig,
    api_key: String,
}

impl HttpSource {
    /// Builds a client.
    ///
    /// # Errors
    ///
    /// Returns `IngestError::MissingCredentials` without an API key, or
    /// `IngestError::InvalidConfig` if the HTTP client cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| IngestError::MissingCredentials("ACE_API_KEY not configured".into()))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IngestError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    fn url(&self, site: &str) -> String {
        format!("{}/sites/{site}/timeseries/paginated", self.config.base_url)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.config.retry_backoff.saturating_mul(1 << attempt.min(16))
    }

    async fn fetch_once(&self, request: &PageRequest) -> std::result::Result<SourcePage, Attempt> {
        let mut query: Vec<(&str, String)> = vec![
            ("start_time", format_millis(request.window.start)),
            ("end_time", format_millis(request.window.end)),
            ("page_size", request.page_size.to_string()),
            ("raw_data", "true".to_string()),
        ];
        if let Some(cursor) = &request.cursor {
            query.push(("cursor", cursor.clone()));
        }

        let response = self
            .client
            .get(self.url(&request.site))
            .bearer_auth(&self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| Attempt::Retry(format!("request error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            let message = format!("HTTP {}: {snippet}", status.as_u16());
            return Err(if is_retryable(status) {
                Attempt::Retry(message)
            } else {
                Attempt::Fatal(message)
            });
        }

        response
            .json::<PageResponse>()
            .await
            .map(SourcePage::from)
            .map_err(|e| Attempt::Fatal(format!("invalid response body: {e}")))
    }
}

enum Attempt {
    Retry(String),
    Fatal(String),
}

impl SampleSource for HttpSource {
    fn fetch_page<'a>(
        &'a self,
        request: &'a PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SourcePage>> + Send + 'a>> {
        Box::pin(async move {
            let mut attempt = 0u32;
            loop {
                debug!(site = %request.site, cursor = ?request.cursor, attempt, "fetching page");
                match self.fetch_once(request).await {
                    Ok(page) => {
                        debug!(
                            rows = page.rows.len(),
                            has_more = page.next_cursor.is_some(),
                            "fetched page"
                        );
                        return Ok(page);
                    }
                    Err(Attempt::Retry(message)) if attempt < self.config.max_retries => {
                        let delay = self.backoff(attempt);
                        warn!(site = %request.site, attempt, ?delay, error = %message, "retrying page fetch");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(Attempt::Retry(message) | Attempt::Fatal(message)) => {
                        return Err(IngestError::SourceUnavailable(message));
                    }
                }
            }
        })
    }
}

/// Serves a fixed list of pages.
///
/// Page `i` is returned for cursor `i` (no cursor means page 0); every page
/// but the last carries the cursor of the next one. The same pages are served
/// for every window and site unless the window or site is marked failing or
/// the site has pages of its own.
#[derive(Debug, Default)]
pub struct StaticSource {
    pages: Vec<Vec<serde_json::Value>>,
    site_pages: HashMap<String, Vec<Vec<serde_json::Value>>>,
    failing_pages: Vec<usize>,
    failing_windows: Vec<TimeRange>,
    failing_sites: Vec<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<PageRequest>>,
}

impl StaticSource {
    /// Creates a source that serves `pages` in order.
    #[must_use]
    pub fn new(pages: Vec<Vec<serde_json::Value>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Creates a source that serves all rows on one page.
    #[must_use]
    pub fn single_page(rows: Vec<serde_json::Value>) -> Self {
        Self::new(vec![rows])
    }

    /// Makes the given page index fail.
    #[must_use]
    pub fn failing_page(mut self, index: usize) -> Self {
        self.failing_pages.push(index);
        self
    }

    /// Makes every request for `window` fail.
    #[must_use]
    pub fn failing_window(mut self, window: TimeRange) -> Self {
        self.failing_windows.push(window);
        self
    }

    /// Serves `pages` to requests for `site` instead of the shared pages.
    #[must_use]
    pub fn with_site_pages(mut self, site: impl Into<String>, pages: Vec<Vec<serde_json::Value>>) -> Self {
        self.site_pages.insert(site.into(), pages);
        self
    }

    /// Makes every request for `site` fail.
    #[must_use]
    pub fn failing_site(mut self, site: impl Into<String>) -> Self {
        self.failing_sites.push(site.into());
        self
    }

    /// Number of pages requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().clone()
    }
}

impl SampleSource for StaticSource {
    fn fetch_page<'a>(
        &'a self,
        request: &'a PageRequest,
    ) -> Pin<Box<dyn Future<Output = Result<SourcePage>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().push(request.clone());

            if self.failing_windows.contains(&request.window) {
                return Err(IngestError::SourceUnavailable(format!(
                    "window {} unavailable",
                    request.window
                )));
            }
            if self.failing_sites.contains(&request.site) {
                return Err(IngestError::SourceUnavailable(format!(
                    "site {} unavailable",
                    request.site
                )));
            }
            let pages = self.site_pages.get(&request.site).unwrap_or(&self.pages);

            let index = match &request.cursor {
                None => 0,
                Some(cursor) => cursor
                    .parse::<usize>()
                    .map_err(|_| IngestError::SourceUnavailable(format!("bad cursor {cursor}")))?,
            };
            if self.failing_pages.contains(&index) {
                return Err(IngestError::SourceUnavailable(format!("page {index} unavailable")));
            }

            let rows = pages.get(index).cloned().unwrap_or_default();
            let next_cursor = (index + 1 < pages.len()).then(|| (index + 1).to_string());
            Ok(SourcePage { rows, next_cursor })
        })
    }
}
