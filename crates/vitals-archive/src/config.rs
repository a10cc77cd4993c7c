//! Archival and compression settings.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ArchiveError, Result};

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Settings for Parquet export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveConfig {
    /// Sites whose samples are exported, each under its own watermark.
    pub sites: Vec<String>,
    /// Directory holding `{site}/{start}_{end}.parquet` segments.
    pub root: PathBuf,
    /// Samples older than `now - archive_after` are exported.
    pub archive_after: Duration,
    /// Widest span a single segment covers.
    pub max_segment: Duration,
    /// Upper bound on segments exported by one run.
    pub max_segments_per_run: usize,
    /// Schedule interval.
    pub interval: Duration,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            sites: vec!["building-vitals-hq".to_string()],
            root: PathBuf::from("cold"),
            archive_after: 7 * DAY,
            max_segment: DAY,
            max_segments_per_run: 64,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

impl ArchiveConfig {
    /// Creates a config for a single `site` writing under `root`.
    #[must_use]
    pub fn new(site: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            sites: vec![site.into()],
            root: root.into(),
            ..Self::default()
        }
    }

    /// Set the exported sites.
    #[must_use]
    pub fn with_sites<I, S>(mut self, sites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sites = sites.into_iter().map(Into::into).collect();
        self
    }

    /// Set the archive boundary.
    #[must_use]
    pub const fn with_archive_after(mut self, after: Duration) -> Self {
        self.archive_after = after;
        self
    }

    /// Set the widest segment span.
    #[must_use]
    pub const fn with_max_segment(mut self, span: Duration) -> Self {
        self.max_segment = span;
        self
    }

    /// Set the per-run segment bound.
    #[must_use]
    pub const fn with_max_segments_per_run(mut self, segments: usize) -> Self {
        self.max_segments_per_run = segments;
        self
    }

    /// Set the schedule interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` on a missing or empty site or
    /// zero spans.
    pub fn validate(&self) -> Result<()> {
        if self.sites.is_empty() {
            return Err(ArchiveError::InvalidConfig("at least one site is required".into()));
        }
        if self.sites.iter().any(|s| s.trim().is_empty()) {
            return Err(ArchiveError::InvalidConfig("site cannot be empty".into()));
        }
        if self.max_segment.as_millis() == 0 {
            return Err(ArchiveError::InvalidConfig("max_segment cannot be zero".into()));
        }
        if self.max_segments_per_run == 0 {
            return Err(ArchiveError::InvalidConfig(
                "max_segments_per_run cannot be zero".into(),
            ));
        }
        Ok(())
    }
}

/// Settings for in-place partition compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionConfig {
    /// Partitions ending before `now - compress_after` are compressed.
    pub compress_after: Duration,
    /// Partition width.
    pub partition_width: Duration,
    /// Schedule interval.
    pub interval: Duration,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            compress_after: 7 * DAY,
            partition_width: DAY,
            interval: Duration::from_secs(60 * 60),
        }
    }
}

impl CompressionConfig {
    /// Set the compression boundary.
    #[must_use]
    pub const fn with_compress_after(mut self, after: Duration) -> Self {
        self.compress_after = after;
        self
    }

    /// Set the partition width.
    #[must_use]
    pub const fn with_partition_width(mut self, width: Duration) -> Self {
        self.partition_width = width;
        self
    }

    /// Set the schedule interval.
    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidConfig` on a zero partition width.
    pub fn validate(&self) -> Result<()> {
        if self.partition_width.as_millis() == 0 {
            return Err(ArchiveError::InvalidConfig("partition width cannot be zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let archive = ArchiveConfig::default();
        assert_eq!(archive.archive_after, 7 * DAY);
        assert_eq!(archive.max_segment, DAY);
        assert!(archive.validate().is_ok());

        let compression = CompressionConfig::default();
        assert_eq!(compression.compress_after, 7 * DAY);
        assert_eq!(compression.partition_width, DAY);
        assert!(compression.validate().is_ok());
    }

    #[test]
    fn invalid_values() {
        assert!(ArchiveConfig::new("", "/tmp").validate().is_err());
        let none: [&str; 0] = [];
        assert!(ArchiveConfig::default().with_sites(none).validate().is_err());
        assert!(ArchiveConfig::default().with_max_segment(Duration::ZERO).validate().is_err());
        assert!(ArchiveConfig::default().with_max_segments_per_run(0).validate().is_err());
        assert!(CompressionConfig::default()
            .with_partition_width(Duration::ZERO)
            .validate()
            .is_err());
    }
}
