//! OS signal handling.

use crate::lifecycle::Shutdown;

/// Spawn a task that triggers graceful shutdown on the first Ctrl+C.
pub fn trigger_on_ctrl_c(shutdown: &Shutdown) {
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            return;
        }
        tracing::info!("shutdown signal received");
        shutdown.trigger();
    });
}
