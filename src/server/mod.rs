//! ceelog server implementation

pub mod connection;
pub mod dispatch;
pub mod listener;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod rotation;
pub mod shutdown;
pub mod sink;
pub mod storage;
pub mod validator;

use crate::config::ServerConfig;
use crate::Result;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use listener::IngestListener;
pub use rotation::LogRotator;
pub use sink::RotatingSink;
pub use storage::SinkRegistry;

/// Where the server is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Sinks opened, not yet accepting connections
    Starting,
    /// Accepting connections
    Listening,
    /// No longer accepting, waiting for in-flight requests
    Draining,
    /// Listener closed and sinks flushed
    Stopped,
}

/// Main ceelog server that coordinates all components
pub struct EventServer {
    config: ServerConfig,
    registry: Arc<SinkRegistry>,
    lifecycle: watch::Sender<LifecycleState>,
}

impl EventServer {
    /// Create a new server, opening every sink.
    ///
    /// Fails if the configuration is invalid or any sink cannot be opened.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SinkRegistry::open(&config.storage).await?);
        let (lifecycle, _) = watch::channel(LifecycleState::Starting);

        Ok(Self {
            config,
            registry,
            lifecycle,
        })
    }

    /// The registry events are written to
    pub fn registry(&self) -> &Arc<SinkRegistry> {
        &self.registry
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.lifecycle.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        IngestListener::bind(&self.config).await
    }

    /// Bind and serve until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` fires.
    ///
    /// The listener may come from anywhere, e.g. a socket already wrapped by
    /// a transport-security layer. On return every sink has been closed.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let rotation_cancel = shutdown.child_token();
        let rotator = LogRotator::new(&self.config.storage.rotation, Arc::clone(&self.registry));
        let rotation_task = tokio::spawn(rotator.start_rotation_task(rotation_cancel.clone()));

        let served = match IngestListener::new(&self.config, Arc::clone(&self.registry), shutdown) {
            Ok(ingest) => ingest.start(listener, &self.lifecycle).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &served {
            error!(error = %e, "Listener failed");
        }

        self.lifecycle.send_replace(LifecycleState::Draining);
        rotation_cancel.cancel();
        if let Err(e) = rotation_task.await {
            error!(error = %e, "Rotation task panicked");
        }

        let closed = self.registry.close_all().await;
        self.lifecycle.send_replace(LifecycleState::Stopped);
        info!("All sinks flushed and closed");

        served.and(closed)
    }
}
