//! Background loops for ingestion, archival, compression and retention.
//!
//! Each loop runs one unit of work per tick. Failures are logged and the
//! loop waits for the next tick; a slow run skips the ticks it overlapped.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::state::AppState;

/// Spawns and owns the background loops.
#[derive(Debug)]
pub struct Scheduler {
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Starts the sync, archive, compress and sweep loops.
    ///
    /// The loops stop once `shutdown` carries `true`.
    #[must_use]
    pub fn start(state: &Arc<AppState>, shutdown: &watch::Receiver<bool>) -> Self {
        let config = state.config();
        let handles = vec![
            spawn_loop("sync", config.ingest.interval, shutdown.clone(), Arc::clone(state), |s| async move {
                match s.sync().await {
                    Ok(report) => debug!(
                        written = report.written,
                        sites = report.sites.len(),
                        failed = report.failed.len(),
                        "sync tick done"
                    ),
                    Err(ServerError::Ingest(e)) if e.is_fatal() => {
                        error!(error = %e, "sync cannot run until the configuration is fixed");
                    }
                    Err(e) => warn!(error = %e, "sync run failed"),
                }
            }),
            spawn_loop("archive", config.archive.interval, shutdown.clone(), Arc::clone(state), |s| async move {
                if let Err(e) = s.archive().await {
                    warn!(error = %e, "archive run failed");
                }
            }),
            spawn_loop(
                "compress",
                config.compression.interval,
                shutdown.clone(),
                Arc::clone(state),
                |s| async move {
                    if let Err(e) = s.compress().await {
                        warn!(error = %e, "compression run failed");
                    }
                },
            ),
            spawn_loop("sweep", config.retention.interval, shutdown.clone(), Arc::clone(state), |s| async move {
                if let Err(e) = s.sweep().await {
                    warn!(error = %e, "retention sweep failed");
                }
            }),
        ];
        Self { handles }
    }

    /// Number of running loops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    /// Returns true if no loop is running.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits for every loop to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "scheduler loop panicked");
            }
        }
    }
}

fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    state: Arc<AppState>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut(Arc<AppState>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(job = name, period = ?period, "scheduler loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => tick(Arc::clone(&state)).await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(job = name, "scheduler loop stopped");
    })
}
