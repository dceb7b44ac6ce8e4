//! Signal handling for graceful shutdown

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit status used when a second signal interrupts the drain
pub const FORCED_EXIT_CODE: i32 = 130;

/// Create a `CancellationToken` and spawn a task that cancels it on
/// SIGINT or SIGTERM.
///
/// A second signal while draining exits the process immediately; records
/// not yet flushed by then are lost.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, draining");
        token_clone.cancel();

        shutdown_signal().await;
        warn!("Second shutdown signal received, exiting without flushing");
        std::process::exit(FORCED_EXIT_CODE);
    });

    token
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
