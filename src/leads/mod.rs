// Lead distribution core: hand each inquiry to exactly one agent, give the
// agent a bounded claim window, and move the lead on when the window lapses.

pub mod directory;
pub mod engine;
pub mod error;
pub mod file;
pub mod ledger;
pub mod memory;
pub mod selector;
#[cfg(feature = "database")]
pub mod sqlite;
pub mod store;
pub mod sweeper;
pub mod types;

pub use directory::{AgentDirectory, AgentRoster, CachedAgentDirectory};
pub use engine::{DistributionEngine, DEFAULT_CLAIM_TIMEOUT_SECONDS};
pub use error::{DistributionError, NoAgentsAvailable, StoreError};
pub use file::FileLeadStore;
pub use ledger::LeadLedger;
pub use memory::InMemoryLeadStore;
pub use selector::select_agent;
#[cfg(feature = "database")]
pub use sqlite::SqliteLeadStore;
pub use store::{CasOutcome, ExpiredAssignment, LeadStore};
pub use sweeper::{SweepTotals, TimeoutSweeper};
pub use types::{
    Agent, AgentId, AssignmentRecord, AssignmentStatus, AssignmentWindow, ClaimOutcome, Lead,
    LeadAssignment, LeadId, LeadStatus, NewLead, StrandedReport, SweepReport,
};
