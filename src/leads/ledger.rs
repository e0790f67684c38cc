// In-process lead ledger shared by the memory and file backends.
//
// Methods take `&mut self`, so callers holding the ledger behind a single
// lock get each conditional update as one indivisible step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::{CasOutcome, ExpiredAssignment};
use super::types::{
    Agent, AgentId, AssignmentRecord, AssignmentStatus, AssignmentWindow, Lead, LeadId,
    LeadStatus,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadLedger {
    #[serde(default)]
    agents: BTreeMap<AgentId, Agent>,
    #[serde(default)]
    leads: BTreeMap<LeadId, Lead>,
    #[serde(default)]
    assignments: Vec<AssignmentRecord>,
}

impl LeadLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_agent(&mut self, agent: Agent) {
        self.agents.insert(agent.id.clone(), agent);
    }

    /// Flip an agent's active flag; returns false for unknown agents
    pub fn set_agent_active(&mut self, agent_id: &AgentId, active: bool) -> bool {
        match self.agents.get_mut(agent_id) {
            Some(agent) => {
                agent.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn agents(&self) -> Vec<Agent> {
        self.agents.values().cloned().collect()
    }

    pub fn active_agents(&self) -> Vec<Agent> {
        self.agents
            .values()
            .filter(|agent| agent.is_active)
            .cloned()
            .collect()
    }

    pub fn insert_lead(&mut self, lead: Lead) {
        self.leads.insert(lead.id, lead);
    }

    pub fn lead(&self, lead_id: LeadId) -> Option<&Lead> {
        self.leads.get(&lead_id)
    }

    pub fn leads(&self) -> impl Iterator<Item = &Lead> {
        self.leads.values()
    }

    pub fn assign(&mut self, lead_id: LeadId, window: &AssignmentWindow) -> CasOutcome {
        let Some(lead) = self.leads.get_mut(&lead_id) else {
            return CasOutcome::Stale;
        };
        if lead.status != LeadStatus::New {
            return CasOutcome::Stale;
        }

        lead.status = LeadStatus::Assigned;
        lead.assigned_to = Some(window.agent_id.clone());
        lead.assigned_at = Some(window.assigned_at);
        lead.timeout_at = Some(window.timeout_at);

        self.assignments.push(AssignmentRecord::pending(
            lead_id,
            window.agent_id.clone(),
            window.assigned_at,
            window.timeout_at,
        ));
        CasOutcome::Applied
    }

    pub fn claim(&mut self, lead_id: LeadId, agent_id: &AgentId, now: DateTime<Utc>) -> CasOutcome {
        let Some(lead) = self.leads.get_mut(&lead_id) else {
            return CasOutcome::Stale;
        };
        if lead.status != LeadStatus::Assigned || lead.assigned_to.as_ref() != Some(agent_id) {
            return CasOutcome::Stale;
        }

        lead.status = LeadStatus::Claimed;
        lead.claimed_at = Some(now);
        lead.assigned_at = None;
        lead.timeout_at = None;

        self.resolve_pending(lead_id, AssignmentStatus::Claimed, now);
        CasOutcome::Applied
    }

    pub fn reassign(
        &mut self,
        lead_id: LeadId,
        previous: &AgentId,
        window: &AssignmentWindow,
    ) -> CasOutcome {
        let Some(lead) = self.leads.get_mut(&lead_id) else {
            return CasOutcome::Stale;
        };
        let expired = lead.timeout_at.is_some_and(|t| t <= window.assigned_at);
        if lead.status != LeadStatus::Assigned
            || lead.assigned_to.as_ref() != Some(previous)
            || !expired
        {
            return CasOutcome::Stale;
        }

        lead.assigned_to = Some(window.agent_id.clone());
        lead.assigned_at = Some(window.assigned_at);
        lead.timeout_at = Some(window.timeout_at);

        self.resolve_pending(lead_id, AssignmentStatus::Timeout, window.assigned_at);
        self.assignments.push(AssignmentRecord::pending(
            lead_id,
            window.agent_id.clone(),
            window.assigned_at,
            window.timeout_at,
        ));
        CasOutcome::Applied
    }

    pub fn expired_assignments(&self, now: DateTime<Utc>) -> Vec<ExpiredAssignment> {
        self.leads
            .values()
            .filter(|lead| lead.is_expired(now))
            .filter_map(|lead| {
                Some(ExpiredAssignment {
                    lead_id: lead.id,
                    agent_id: lead.assigned_to.clone()?,
                    timeout_at: lead.timeout_at?,
                })
            })
            .collect()
    }

    pub fn unassigned_leads(&self) -> Vec<LeadId> {
        self.leads
            .values()
            .filter(|lead| lead.status == LeadStatus::New)
            .map(|lead| lead.id)
            .collect()
    }

    pub fn assignment_history(&self, lead_id: LeadId) -> Vec<AssignmentRecord> {
        self.assignments
            .iter()
            .filter(|record| record.lead_id == lead_id)
            .cloned()
            .collect()
    }

    fn resolve_pending(&mut self, lead_id: LeadId, status: AssignmentStatus, at: DateTime<Utc>) {
        for record in self
            .assignments
            .iter_mut()
            .filter(|r| r.lead_id == lead_id && r.status == AssignmentStatus::Pending)
        {
            record.status = status;
            record.resolved_at = Some(at);
        }
    }
}
