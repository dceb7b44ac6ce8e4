//! TCP listener for the ingestion endpoint

use crate::config::ServerConfig;
use crate::server::connection::TrackedListener;
use crate::server::dispatch::{self, AppState};
use crate::server::{LifecycleState, SinkRegistry};
use crate::{CeeLogError, Result};
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How long force-closed connections get to unwind
const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// HTTP server accepting events until the shutdown token fires
pub struct IngestListener {
    config: ServerConfig,
    state: AppState,
    shutdown: CancellationToken,
}

impl IngestListener {
    /// Create a new listener
    pub fn new(
        config: &ServerConfig,
        registry: Arc<SinkRegistry>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            state: AppState::new(config, registry)?,
            shutdown,
        })
    }

    /// Bind the configured address
    pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
        let address = (config.server.host.as_str(), config.server.port);
        TcpListener::bind(address).await.map_err(|e| {
            CeeLogError::Server(format!(
                "Failed to bind {}:{}: {}",
                config.server.host, config.server.port, e
            ))
        })
    }

    /// Serve until shutdown, then drain in-flight requests.
    ///
    /// Once the token fires the listener stops accepting. Open connections
    /// get the configured grace period to finish; after that they are closed
    /// and this returns only once every connection is gone, so no handler
    /// runs past it.
    pub async fn start(
        self,
        listener: TcpListener,
        lifecycle: &watch::Sender<LifecycleState>,
    ) -> Result<()> {
        let address = listener.local_addr()?;
        let app = dispatch::router(&self.config, self.state);

        let force_close = CancellationToken::new();
        let connections = TaskTracker::new();
        let listener = TrackedListener::new(listener, force_close.clone(), connections.clone());

        let token = self.shutdown.clone();
        let server = axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move { token.cancelled().await });
        let mut server = tokio::spawn(server.into_future());

        lifecycle.send_replace(LifecycleState::Listening);
        info!(%address, path = %self.config.server.ingest_path, "Listening for events");

        tokio::select! {
            joined = &mut server => return Ok(joined??),
            () = self.shutdown.cancelled() => {}
        }

        lifecycle.send_replace(LifecycleState::Draining);
        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        info!(grace_secs = grace.as_secs(), open = connections.len(), "Draining in-flight requests");

        if let Ok(joined) = timeout(grace, &mut server).await {
            return Ok(joined??);
        }

        warn!(open = connections.len(), "Grace period elapsed, closing remaining connections");
        force_close.cancel();
        connections.close();
        if timeout(FORCE_CLOSE_TIMEOUT, connections.wait()).await.is_err() {
            warn!(open = connections.len(), "Connections still open after force-close");
        }
        server.abort();
        Ok(())
    }
}
