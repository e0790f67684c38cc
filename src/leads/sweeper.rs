// Timeout Sweeper
//
// The core has no clock of its own. `sweep_once` is what an external
// scheduler calls; `run_periodic` is that scheduler for deployments that
// only have this binary (cron-style ticking until shutdown).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use super::directory::AgentDirectory;
use super::engine::DistributionEngine;
use super::error::DistributionError;
use super::store::LeadStore;
use super::types::SweepReport;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepTotals {
    pub sweeps: u64,
    pub failed_sweeps: u64,
    pub reassigned_count: u64,
    pub unresolved_count: u64,
    pub contended_count: u64,
    pub recovered_count: u64,
}

impl SweepTotals {
    fn absorb(&mut self, report: &SweepReport) {
        self.sweeps += 1;
        self.reassigned_count += report.reassigned_count;
        self.unresolved_count += report.unresolved_count;
        self.contended_count += report.contended_count;
    }
}

pub struct TimeoutSweeper<S, D> {
    engine: Arc<DistributionEngine<S, D>>,
    retry_stranded: bool,
}

impl<S: LeadStore, D: AgentDirectory> TimeoutSweeper<S, D> {
    pub fn new(engine: Arc<DistributionEngine<S, D>>) -> Self {
        Self {
            engine,
            retry_stranded: false,
        }
    }

    /// Also retry leads stuck in `new` on every tick
    pub fn with_stranded_retry(mut self, enabled: bool) -> Self {
        self.retry_stranded = enabled;
        self
    }

    pub async fn sweep_once(&self) -> Result<SweepReport, DistributionError> {
        self.engine.sweep_timeouts(Utc::now()).await
    }

    /// Tick every `interval` until `shutdown` resolves. A failed tick is
    /// logged and the loop keeps going; the next tick sees the same expired
    /// rows again.
    pub async fn run_periodic<F>(&self, interval: Duration, shutdown: F) -> SweepTotals
    where
        F: Future<Output = ()>,
    {
        let mut totals = SweepTotals::default();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(interval_ms = interval.as_millis() as u64, "Timeout sweeper started");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    match self.sweep_once().await {
                        Ok(report) => totals.absorb(&report),
                        Err(e) => {
                            totals.failed_sweeps += 1;
                            error!(error = %e, "Timeout sweep failed");
                        }
                    }

                    if self.retry_stranded {
                        match self.engine.assign_stranded().await {
                            Ok(report) => totals.recovered_count += report.assigned_count,
                            Err(e) => error!(error = %e, "Stranded lead retry failed"),
                        }
                    }
                }
            }
        }

        info!(
            sweeps = totals.sweeps,
            reassigned = totals.reassigned_count,
            unresolved = totals.unresolved_count,
            "Timeout sweeper stopped"
        );
        totals
    }
}
