//! Server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use vitals_archive::{ArchiveConfig, CompressionConfig};
use vitals_ingest::{IngestConfig, SourceConfig};
use vitals_query::QueryConfig;
use vitals_store::RetentionConfig;

use crate::error::{Result, ServerError};

/// Default site served by a deployment.
pub const DEFAULT_SITE: &str = "building-vitals-hq";

/// Configuration for the whole service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP server to.
    pub bind_addr: SocketAddr,
    /// Hot store database file.
    pub database: PathBuf,
    /// CORS allowed origins (empty means all).
    pub cors_origins: Vec<String>,
    /// Ingestion settings.
    pub ingest: IngestConfig,
    /// External source settings.
    pub source: SourceConfig,
    /// Cold export settings.
    pub archive: ArchiveConfig,
    /// Partition compression settings.
    pub compression: CompressionConfig,
    /// Retention settings.
    pub retention: RetentionConfig,
    /// Query settings.
    pub query: QueryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_SITE, "data/vitals.db", "data/cold")
    }
}

impl ServerConfig {
    /// Creates a config serving a single `site` from the given storage
    /// locations.
    #[must_use]
    pub fn new(site: &str, database: impl Into<PathBuf>, cold_root: impl Into<PathBuf>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            database: database.into(),
            cors_origins: Vec::new(),
            ingest: IngestConfig::new(site),
            source: SourceConfig::default(),
            archive: ArchiveConfig::new(site, cold_root),
            compression: CompressionConfig::default(),
            retention: RetentionConfig::default(),
            query: QueryConfig::new(site),
        }
    }

    /// The sites this deployment serves.
    #[must_use]
    pub fn sites(&self) -> &[String] {
        &self.query.sites
    }

    /// Serve `sites` in every section.
    #[must_use]
    pub fn with_sites(mut self, sites: &[String]) -> Self {
        self.ingest = self.ingest.with_sites(sites.iter().cloned());
        self.archive = self.archive.with_sites(sites.iter().cloned());
        self.query = self.query.with_sites(sites.iter().cloned());
        self
    }

    /// Set the bind address.
    #[must_use]
    pub const fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Add a CORS allowed origin.
    #[must_use]
    pub fn with_cors_origin(mut self, origin: impl Into<String>) -> Self {
        self.cors_origins.push(origin.into());
        self
    }

    /// Replace the ingestion settings.
    #[must_use]
    pub fn with_ingest(mut self, ingest: IngestConfig) -> Self {
        self.ingest = ingest;
        self
    }

    /// Replace the source settings.
    #[must_use]
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.source = source;
        self
    }

    /// Replace the archive settings.
    #[must_use]
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    /// Replace the compression settings.
    #[must_use]
    pub const fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    /// Replace the retention settings.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }

    /// Replace the query settings.
    #[must_use]
    pub fn with_query(mut self, query: QueryConfig) -> Self {
        self.query = query;
        self
    }

    /// Validates each section and the tier boundaries between them.
    ///
    /// Samples must be archived before they leave the hot tier
    /// (`archive_after <= hot_boundary`) and the hot tier must still hold
    /// everything it claims to serve (`hot_boundary <= retention`).
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |e: &dyn std::fmt::Display| ServerError::InvalidConfig(e.to_string());
        self.ingest.validate().map_err(|e| invalid(&e))?;
        self.archive.validate().map_err(|e| invalid(&e))?;
        self.compression.validate().map_err(|e| invalid(&e))?;
        self.query.validate().map_err(|e| invalid(&e))?;

        let sites = self.sites();
        if self.ingest.sites != sites || self.archive.sites != sites {
            return Err(ServerError::InvalidConfig(format!(
                "ingest ({:?}), archive ({:?}) and query ({sites:?}) must serve the same sites",
                self.ingest.sites, self.archive.sites
            )));
        }
        if self.archive.archive_after > self.query.hot_boundary {
            return Err(ServerError::InvalidConfig(format!(
                "archive_after ({:?}) must not exceed hot_boundary ({:?})",
                self.archive.archive_after, self.query.hot_boundary
            )));
        }
        if self.query.hot_boundary > self.retention.retention {
            return Err(ServerError::InvalidConfig(format!(
                "hot_boundary ({:?}) must not exceed retention ({:?})",
                self.query.hot_boundary, self.retention.retention
            )));
        }
        if self.retention.interval.is_zero()
            || self.ingest.interval.is_zero()
            || self.archive.interval.is_zero()
            || self.compression.interval.is_zero()
        {
            return Err(ServerError::InvalidConfig("schedule intervals cannot be zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const DAY: Duration = Duration::from_secs(86_400);

    #[test]
    fn defaults_are_consistent() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sites(), [DEFAULT_SITE]);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.query.hot_boundary, 20 * DAY);
        assert_eq!(config.retention.retention, 30 * DAY);
    }

    #[test]
    fn hot_boundary_beyond_retention_is_rejected() {
        let config = ServerConfig::default()
            .with_query(QueryConfig::new(DEFAULT_SITE).with_hot_boundary(40 * DAY));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("hot_boundary"), "{err}");
    }

    #[test]
    fn archive_after_beyond_hot_boundary_is_rejected() {
        let archive = ArchiveConfig::new(DEFAULT_SITE, "cold").with_archive_after(21 * DAY);
        let err = ServerConfig::default().with_archive(archive).validate().unwrap_err();
        assert!(err.to_string().contains("archive_after"), "{err}");
    }

    #[test]
    fn mismatched_sites_are_rejected() {
        let config = ServerConfig::default().with_ingest(IngestConfig::new("elsewhere"));
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn site_list_applies_to_every_section() {
        let sites = vec!["hq".to_string(), "annex".to_string()];
        let config = ServerConfig::default().with_sites(&sites);
        assert!(config.validate().is_ok());
        assert_eq!(config.ingest.sites, sites);
        assert_eq!(config.archive.sites, sites);
        assert!(config.query.has_site("annex"));

        let partial = config.with_archive(ArchiveConfig::new("hq", "cold"));
        assert!(partial.validate().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = ServerConfig::default()
            .with_retention(RetentionConfig::default().with_interval(Duration::ZERO));
        assert!(config.validate().is_err());
    }
}
