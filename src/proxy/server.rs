//! Connection supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;

use crate::config::ProxyConfig;
use crate::http::CodecLimits;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionTracker, Listener};
use crate::plugin::Pipeline;
use crate::proxy::{handler, ProxyError};

/// Accept loop plus graceful-shutdown drain.
///
/// Each accepted connection runs in its own task holding a listener permit
/// and a tracker guard; a failure in one connection never affects the
/// accept loop or its siblings. On shutdown the server stops accepting,
/// waits up to the drain deadline for in-flight connections, then aborts
/// what remains and finalizes the pipeline.
pub struct ProxyServer {
    config: ProxyConfig,
    pipeline: Arc<Pipeline>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, pipeline: Pipeline) -> Self {
        Self {
            config,
            pipeline: Arc::new(pipeline),
        }
    }

    /// Run until `shutdown` triggers.
    pub async fn run(self, listener: Listener, shutdown: Shutdown) -> Result<(), ProxyError> {
        let mut shutdown_rx = shutdown.subscribe();
        let limits = CodecLimits {
            max_header_bytes: self.config.limits.max_header_bytes,
            max_body_bytes: self.config.limits.max_body_bytes,
            max_response_bytes: self.config.limits.max_response_bytes,
        };
        let connect_timeout = Duration::from_secs(self.config.timeouts.connect_secs);
        let tracker = ConnectionTracker::new();
        let mut tasks = JoinSet::new();

        tracing::info!(
            address = %listener.local_addr()?,
            plugins = ?self.pipeline.plugin_names(),
            "proxy serving"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                // Reap finished connection tasks as they complete.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = listener.accept() => {
                    // Accept failures are transient (aborted handshakes,
                    // descriptor pressure); only bind failure is fatal.
                    let (stream, peer, permit) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed; continuing");
                            continue;
                        }
                    };
                    let pipeline = Arc::clone(&self.pipeline);
                    let guard = tracker.track();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let id = guard.id();
                        if let Err(err) =
                            handler::handle_connection(stream, peer, pipeline, limits, connect_timeout).await
                        {
                            tracing::warn!(
                                connection_id = %id,
                                peer_addr = %peer,
                                error = %err,
                                "connection ended with error"
                            );
                        }
                    });
                }
            }
        }

        let active = tracker.active_count();
        if active > 0 {
            tracing::info!(active, "shutdown requested; draining connections");
            let drain = Duration::from_secs(self.config.timeouts.drain_secs);
            let drained = tokio::time::timeout(drain, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    remaining = tracker.active_count(),
                    "drain deadline reached; closing remaining connections"
                );
                tasks.shutdown().await;
            }
        }

        self.pipeline.finalize();
        tracing::info!("proxy stopped");
        Ok(())
    }
}
