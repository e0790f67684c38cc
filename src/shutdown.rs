use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::observability::distribution_metrics;

/// Graceful shutdown coordinator for the long-running sweep loop
pub struct ShutdownCoordinator {
    metrics_enabled: bool,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ShutdownCoordinator {
    pub fn new(metrics_enabled: bool) -> Self {
        Self { metrics_enabled }
    }

    /// Resolves on SIGINT, or SIGTERM where the platform has it
    pub async fn wait_for_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                        _ = term.recv() => info!("Received SIGTERM"),
                    }
                    return;
                }
                Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
            }
        }

        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
        info!("Received SIGINT");
    }

    /// Wait at most `grace` for `drain` (an in-flight sweep) to settle.
    /// Returns `None` when the grace period ran out first.
    pub async fn finish<F>(&self, grace: Duration, drain: F) -> Option<F::Output>
    where
        F: std::future::Future,
    {
        info!("Initiating graceful shutdown");

        let drained = timeout(grace, drain).await.ok();
        if drained.is_none() {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "In-flight work did not finish before the grace period"
            );
        }

        if self.metrics_enabled {
            distribution_metrics().log_stats();
        }

        info!("Graceful shutdown completed");
        drained
    }
}
