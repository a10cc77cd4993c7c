//! # vitals-server
//!
//! HTTP API, background scheduler and command-line entry points for the
//! building vitals time-series service.
//!
//! ## API Endpoints
//!
//! | Endpoint | Method | Description |
//! |----------|--------|-------------|
//! | `/health` | GET | Liveness with server time and version |
//! | `/timeseries/query` | GET | Samples for points over `[start_time, end_time)` across tiers |
//! | `/timeseries/latest` | GET | Newest sample per point |
//! | `/timeseries/quality` | GET | Per-point quality summary over a range |
//!
//! Errors are returned as `{"error": ..., "error_code": ...}` with
//! `INVALID_REQUEST` (400) or `INTERNAL_ERROR` (500).
//!
//! ## Background jobs
//!
//! `vitals serve` runs four interval loops next to the API: ingestion sync,
//! cold export, partition compression and the retention sweep.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod scheduler;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use scheduler::Scheduler;
pub use server::VitalsServer;
pub use state::AppState;
