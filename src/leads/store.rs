// Lead Store contract
//
// Every mutating method is a single conditional update: it checks the
// expected prior state and applies the lead change together with the
// matching assignment-log change, or changes nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StoreError;
use super::types::{AgentId, AssignmentRecord, AssignmentWindow, Lead, LeadId};

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// The stored row no longer matched the expected state
    Stale,
}

impl CasOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}


/// A lead whose claim window has closed, as seen by a sweep scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredAssignment {
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub timeout_at: DateTime<Utc>,
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Persist a freshly created lead in `new`
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError>;

    async fn get_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, StoreError>;

    /// `new -> assigned`, inserting the first pending record.
    /// Applies only while the lead is still `new`.
    async fn assign(
        &self,
        lead_id: LeadId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError>;

    /// `assigned -> claimed` for `agent_id`, flipping its pending record to claimed.
    /// Applies only while the lead is `assigned` to exactly that agent.
    async fn claim(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError>;

    /// `assigned -> assigned` with a new agent: times out the pending record and
    /// appends a new one. Applies only while the lead is still `assigned` to
    /// `previous` with `timeout_at <= now`.
    async fn reassign(
        &self,
        lead_id: LeadId,
        previous: &AgentId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError>;

    /// Leads in `assigned` whose `timeout_at <= now`
    async fn expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAssignment>, StoreError>;

    /// Leads still in `new`
    async fn unassigned_leads(&self) -> Result<Vec<LeadId>, StoreError>;

    /// Assignment log for one lead, oldest first
    async fn assignment_history(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<AssignmentRecord>, StoreError>;
}
