use thiserror::Error;

use super::types::{LeadId, LeadStatus};

/// Failures raised by a persistence backend. Any of these means the
/// transition was not committed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[cfg(feature = "database")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "database")]
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Lock acquisition failed: {reason}")]
    Lock { reason: String },

    #[error("Stored data is corrupt: {reason}")]
    Corrupt { reason: String },
}

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("Invalid input: {field} is required")]
    InvalidInput { field: &'static str },

    #[error("No agents available to take lead {}", display_lead(.lead_id))]
    NoAgentsAvailable { lead_id: Option<LeadId> },

    #[error("Lead {lead_id} not found")]
    LeadNotFound { lead_id: LeadId },

    #[error("Lead {lead_id} cannot be assigned while {status}")]
    NotAssignable { lead_id: LeadId, status: LeadStatus },

    #[error("Storage failure: {0}")]
    Storage(#[from] StoreError),
}

fn display_lead(lead_id: &Option<LeadId>) -> String {
    lead_id.map(|id| id.to_string()).unwrap_or_else(|| "(unsaved)".to_string())
}

/// Selector result when no eligible agent remains after filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no eligible agent")]
pub struct NoAgentsAvailable;
