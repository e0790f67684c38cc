use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::directory::AgentDirectory;
use super::error::StoreError;
use super::ledger::LeadLedger;
use super::store::{CasOutcome, ExpiredAssignment, LeadStore};
use super::types::{Agent, AgentId, AssignmentRecord, AssignmentWindow, Lead, LeadId};

/// Process-local store: one mutex around the ledger makes each
/// conditional update atomic with respect to every other caller.
#[derive(Debug, Default)]
pub struct InMemoryLeadStore {
    ledger: Mutex<LeadLedger>,
}

impl InMemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(agents: impl IntoIterator<Item = Agent>) -> Self {
        let mut ledger = LeadLedger::new();
        for agent in agents {
            ledger.upsert_agent(agent);
        }
        Self {
            ledger: Mutex::new(ledger),
        }
    }

    pub async fn upsert_agent(&self, agent: Agent) {
        self.ledger.lock().await.upsert_agent(agent);
    }

    pub async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> bool {
        self.ledger.lock().await.set_agent_active(agent_id, active)
    }

    pub async fn agents(&self) -> Vec<Agent> {
        self.ledger.lock().await.agents()
    }

    pub async fn leads(&self) -> Vec<Lead> {
        self.ledger.lock().await.leads().cloned().collect()
    }
}

#[async_trait]
impl LeadStore for InMemoryLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        self.ledger.lock().await.insert_lead(lead.clone());
        Ok(())
    }

    async fn get_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, StoreError> {
        Ok(self.ledger.lock().await.lead(lead_id).cloned())
    }

    async fn assign(
        &self,
        lead_id: LeadId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        Ok(self.ledger.lock().await.assign(lead_id, window))
    }

    async fn claim(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        Ok(self.ledger.lock().await.claim(lead_id, agent_id, now))
    }

    async fn reassign(
        &self,
        lead_id: LeadId,
        previous: &AgentId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        Ok(self.ledger.lock().await.reassign(lead_id, previous, window))
    }

    async fn expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAssignment>, StoreError> {
        Ok(self.ledger.lock().await.expired_assignments(now))
    }

    async fn unassigned_leads(&self) -> Result<Vec<LeadId>, StoreError> {
        Ok(self.ledger.lock().await.unassigned_leads())
    }

    async fn assignment_history(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        Ok(self.ledger.lock().await.assignment_history(lead_id))
    }
}

#[async_trait]
impl AgentDirectory for InMemoryLeadStore {
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError> {
        Ok(self.ledger.lock().await.active_agents())
    }
}
