//! OS signal handling.
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGINT (Ctrl-C) and, on unix, SIGTERM both trigger graceful shutdown

use crate::lifecycle::Shutdown;

/// Wait for Ctrl-C or SIGTERM, then trigger `shutdown`.
pub async fn wait_for_signal(shutdown: Shutdown) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
    shutdown.trigger();
}
