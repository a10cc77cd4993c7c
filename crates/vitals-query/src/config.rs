//! Router settings.

use std::time::Duration;

use crate::error::{QueryError, Result};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings for the query router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// Sites this deployment serves.
    pub sites: Vec<String>,
    /// Samples newer than `now - hot_boundary` are served by the hot store.
    pub hot_boundary: Duration,
    /// How far past `now` a request's end may reach.
    pub max_future: Duration,
    /// Wall-clock budget for each tier read.
    pub budget: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            sites: vec!["building-vitals-hq".to_string()],
            hot_boundary: 20 * DAY,
            max_future: DAY,
            budget: Duration::from_secs(30),
        }
    }
}

impl QueryConfig {
    /// Creates a config serving a single `site`.
    #[must_use]
    pub fn new(site: impl Into<String>) -> Self {
        Self {
            sites: vec![site.into()],
            ..Self::default()
        }
    }

    /// Set the served sites.
    #[must_use]
    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = sites.into_iter().map(Into::into).collect();
        self
    }

    /// Returns true if `site` is served here.
    #[must_use]
    pub fn has_site(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s == site)
    }

    /// Set the hot/cold boundary.
    #[must_use]
    pub const fn with_hot_boundary(mut self, boundary: Duration) -> Self {
        self.hot_boundary = boundary;
        self
    }

    /// Set the per-tier budget.
    #[must_use]
    pub const fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Set how far in the future a request may end.
    #[must_use]
    pub const fn with_max_future(mut self, max_future: Duration) -> Self {
        self.max_future = max_future;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `QueryError::InvalidConfig` on a missing or empty site or a
    /// zero budget.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(QueryError::InvalidConfig("at least one site is required".into()));
        }
        if self.sites.iter().any(|s| s.trim().is_empty()) {
            return Err(QueryError::InvalidConfig("site cannot be empty".into()));
        }
        if self.budget.is_zero() {
            return Err(QueryError::InvalidConfig("budget cannot be zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = QueryConfig::default();
        assert_eq!(config.hot_boundary, 20 * DAY);
        assert_eq!(config.max_future, DAY);
        assert_eq!(config.budget, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_zero_budget() {
        assert!(QueryConfig::new("site").with_budget(Duration::ZERO).validate().is_err());
        assert!(QueryConfig::new(" ").validate().is_err());
        let none: [&str; 0] = [];
        assert!(QueryConfig::default().with_sites(none).validate().is_err());
    }

    #[test]
    fn has_every_listed_site() {
        let config = QueryConfig::default().with_sites(["S1", "S2"]);
        assert!(config.has_site("S1"));
        assert!(config.has_site("S2"));
        assert!(!config.has_site("S3"));
    }
}
