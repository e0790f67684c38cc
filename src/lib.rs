// Lead Dispatch Library - lead distribution with claim windows
// This exposes the core components for testing and integration

pub mod config;
#[cfg(feature = "database")]
pub mod database;
pub mod leads;
pub mod observability;
pub mod shutdown;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{LeadDispatchConfig, StorageBackend};
#[cfg(feature = "database")]
pub use database::DatabaseManager;
pub use leads::{
    Agent, AgentDirectory, AgentId, CachedAgentDirectory, ClaimOutcome, DistributionEngine,
    DistributionError, FileLeadStore, InMemoryLeadStore, Lead, LeadAssignment, LeadId, LeadStatus,
    LeadStore, NewLead, StoreError, SweepReport, TimeoutSweeper,
};
pub use observability::{distribution_metrics, DistributionMetrics, OperationTimer};
pub use shutdown::ShutdownCoordinator;
pub use telemetry::{create_distribution_span, generate_correlation_id, init_telemetry};
