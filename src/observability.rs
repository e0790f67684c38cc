use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Counters for the lead distribution state machine
#[derive(Debug, Default)]
pub struct DistributionMetrics {
    pub leads_created: AtomicU64,
    pub assignments: AtomicU64,
    pub claims_won: AtomicU64,
    pub claim_conflicts: AtomicU64,
    pub reassignments: AtomicU64,
    pub unresolved_timeouts: AtomicU64,
    pub contended_updates: AtomicU64,
    pub stranded_leads: AtomicU64,
}

impl DistributionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_lead_created(&self) {
        self.leads_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_assignment(&self) {
        self.assignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self, won: bool) {
        if won {
            self.claims_won.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claim_conflicts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_reassignment(&self) {
        self.reassignments.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unresolved(&self) {
        self.unresolved_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contended(&self) {
        self.contended_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stranded(&self) {
        self.stranded_leads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> DistributionStats {
        DistributionStats {
            leads_created: self.leads_created.load(Ordering::Relaxed),
            assignments: self.assignments.load(Ordering::Relaxed),
            claims_won: self.claims_won.load(Ordering::Relaxed),
            claim_conflicts: self.claim_conflicts.load(Ordering::Relaxed),
            reassignments: self.reassignments.load(Ordering::Relaxed),
            unresolved_timeouts: self.unresolved_timeouts.load(Ordering::Relaxed),
            contended_updates: self.contended_updates.load(Ordering::Relaxed),
            stranded_leads: self.stranded_leads.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            leads_created = stats.leads_created,
            assignments = stats.assignments,
            claims_won = stats.claims_won,
            claim_conflicts = stats.claim_conflicts,
            reassignments = stats.reassignments,
            unresolved_timeouts = stats.unresolved_timeouts,
            contended_updates = stats.contended_updates,
            stranded_leads = stats.stranded_leads,
            "Lead distribution metrics"
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributionStats {
    pub leads_created: u64,
    pub assignments: u64,
    pub claims_won: u64,
    pub claim_conflicts: u64,
    pub reassignments: u64,
    pub unresolved_timeouts: u64,
    pub contended_updates: u64,
    pub stranded_leads: u64,
}

/// Global metrics instance
static DISTRIBUTION_METRICS: std::sync::LazyLock<DistributionMetrics> =
    std::sync::LazyLock::new(DistributionMetrics::new);

pub fn distribution_metrics() -> &'static DistributionMetrics {
    &DISTRIBUTION_METRICS
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}
