//! Command-line argument parsing with clap.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use vitals_archive::{ArchiveConfig, CompressionConfig};
use vitals_ingest::config::DEFAULT_SOURCE_BASE;
use vitals_ingest::parser::{parse_time, RawTime};
use vitals_ingest::{IngestConfig, SourceConfig};
use vitals_query::QueryConfig;
use vitals_store::{RetentionConfig, TimeRange};

use crate::config::{ServerConfig, DEFAULT_SITE};
use crate::error::{Result, ServerError};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Building vitals time-series service.
#[derive(Parser, Debug, Clone)]
#[command(name = "vitals")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Sites served by this deployment (repeatable or comma-separated).
    #[arg(
        long = "site",
        env = "VITALS_SITES",
        value_delimiter = ',',
        default_value = DEFAULT_SITE,
        global = true
    )]
    pub sites: Vec<String>,

    /// Hot store database file.
    #[arg(long, env = "VITALS_DATABASE", default_value = "data/vitals.db", global = true)]
    pub database: PathBuf,

    /// Directory for archived Parquet segments.
    #[arg(long, env = "VITALS_COLD_ROOT", default_value = "data/cold", global = true)]
    pub cold_root: PathBuf,

    /// External source base URL.
    #[arg(long, env = "VITALS_SOURCE_URL", default_value = DEFAULT_SOURCE_BASE, global = true)]
    pub source_url: String,

    /// External source API key.
    #[arg(long, env = "ACE_API_KEY", hide_env_values = true, global = true)]
    pub api_key: Option<String>,

    /// Samples newer than this many days are served from the hot store.
    #[arg(long, env = "VITALS_HOT_BOUNDARY_DAYS", default_value_t = 20, global = true)]
    pub hot_boundary_days: u64,

    /// Hot store retention in days.
    #[arg(long, env = "VITALS_RETENTION_DAYS", default_value_t = 30, global = true)]
    pub retention_days: u64,

    /// Samples older than this many days are exported to cold storage.
    #[arg(long, env = "VITALS_ARCHIVE_AFTER_DAYS", default_value_t = 7, global = true)]
    pub archive_after_days: u64,

    /// Hot partitions older than this many days are compressed.
    #[arg(long, env = "VITALS_COMPRESS_AFTER_DAYS", default_value_t = 7, global = true)]
    pub compress_after_days: u64,

    /// Log output format.
    #[arg(long, env = "VITALS_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text, global = true)]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Log output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP API and the background jobs.
    Serve {
        /// Address to listen on.
        #[arg(long, env = "VITALS_BIND", default_value = "0.0.0.0:8080")]
        bind: SocketAddr,

        /// Seconds between ingestion runs.
        #[arg(long, env = "VITALS_SYNC_INTERVAL_SECS", default_value_t = 300)]
        sync_interval_secs: u64,

        /// Allowed CORS origin (repeatable; none allows any).
        #[arg(long = "cors-origin")]
        cors_origins: Vec<String>,
    },

    /// Ingest the trailing window once.
    Sync {
        /// Window length in minutes.
        #[arg(long, default_value_t = 10)]
        window_minutes: u64,
    },

    /// Ingest a historical range, newest window first.
    Backfill {
        /// Range start (RFC 3339 or ISO-8601, UTC if no offset).
        #[arg(long)]
        start: String,

        /// Range end (exclusive).
        #[arg(long)]
        end: String,

        /// Window length in minutes.
        #[arg(long, default_value_t = 10)]
        chunk_minutes: u64,
    },

    /// Export aged samples to cold storage once.
    Archive,

    /// Compress aged hot partitions once.
    Compress,

    /// Apply the retention horizon once.
    Sweep,
}

impl Cli {
    /// Builds the service configuration from the parsed arguments.
    #[must_use]
    pub fn server_config(&self) -> ServerConfig {
        let days = |n: u64| Duration::from_secs(n * DAY_SECS);

        let mut ingest = IngestConfig::default().with_sites(self.sites.iter().cloned());
        let mut source = SourceConfig::default().with_base_url(self.source_url.as_str());
        if let Some(key) = &self.api_key {
            source = source.with_api_key(key.as_str());
        }

        let mut config = ServerConfig::new(DEFAULT_SITE, self.database.clone(), self.cold_root.clone())
            .with_sites(&self.sites);
        match &self.command {
            Command::Serve {
                bind,
                sync_interval_secs,
                cors_origins,
            } => {
                ingest = ingest.with_interval(Duration::from_secs(*sync_interval_secs));
                config = config.with_bind_addr(*bind);
                for origin in cors_origins {
                    config = config.with_cors_origin(origin.as_str());
                }
            }
            Command::Sync { window_minutes } => {
                ingest = ingest.with_window(Duration::from_secs(window_minutes * 60));
            }
            Command::Backfill { .. } | Command::Archive | Command::Compress | Command::Sweep => {}
        }

        config
            .with_ingest(ingest)
            .with_source(source)
            .with_archive(
                ArchiveConfig::new(DEFAULT_SITE, self.cold_root.clone())
                    .with_sites(self.sites.iter().cloned())
                    .with_archive_after(days(self.archive_after_days)),
            )
            .with_compression(CompressionConfig::default().with_compress_after(days(self.compress_after_days)))
            .with_retention(RetentionConfig::default().with_retention(days(self.retention_days)))
            .with_query(
                QueryConfig::default()
                    .with_sites(self.sites.iter().cloned())
                    .with_hot_boundary(days(self.hot_boundary_days)),
            )
    }
}

/// Parses a backfill range from command-line timestamps.
///
/// # Errors
///
/// Returns `ServerError::InvalidRequest` for unparseable or inverted bounds.
pub fn parse_range(start: &str, end: &str) -> Result<TimeRange> {
    let parse = |text: &str| {
        parse_time(&RawTime::Text(text.to_string()))
            .ok_or_else(|| ServerError::InvalidRequest(format!("unrecognized timestamp: {text:?}")))
    };
    let (start, end) = (parse(start)?, parse(end)?);
    TimeRange::new(start, end).map_err(|e| ServerError::InvalidRequest(e.to_string()))
}
