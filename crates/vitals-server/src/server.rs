//! HTTP server with background jobs.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, ServerError};
use crate::routes::create_router;
use crate::scheduler::Scheduler;
use crate::state::AppState;

/// The query API plus its scheduled jobs.
#[derive(Debug, Clone)]
pub struct VitalsServer {
    state: Arc<AppState>,
}

impl VitalsServer {
    /// Creates a server over `state`.
    #[must_use]
    pub fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Returns the shared state.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Creates the router without starting the server.
    pub fn router(&self) -> axum::Router {
        create_router(self.state())
    }

    /// Serves HTTP on `addr` until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn serve_with_shutdown<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(addr, e))?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serves HTTP on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().map_err(|e| ServerError::Internal(e.to_string()))?;
        info!(addr = %addr, sites = ?self.state.config().sites(), "vitals server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        info!("vitals server shut down");
        Ok(())
    }

    /// Runs the scheduler loops and the HTTP server until `shutdown`
    /// resolves, then waits for in-flight jobs to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails. The loops are stopped either way.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let scheduler = Scheduler::start(&self.state, &stop_rx);

        let served = self
            .serve_with_shutdown(self.state.config().bind_addr, shutdown)
            .await;

        stop_tx.send_replace(true);
        scheduler.join().await;
        served
    }
}
