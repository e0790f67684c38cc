// Distribution Engine - create/claim/reassign orchestration
//
// The engine never reads a lead and then writes it back. Every transition
// is handed to the store as a guarded update, and a stale guard is an
// ordinary outcome rather than an error.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use super::directory::AgentDirectory;
use super::error::{DistributionError, NoAgentsAvailable};
use super::selector::select_agent;
use super::store::{CasOutcome, LeadStore};
use super::types::{
    Agent, AgentId, AssignmentRecord, AssignmentWindow, ClaimOutcome, Lead, LeadAssignment,
    LeadId, LeadStatus, NewLead, StrandedReport, SweepReport,
};
use crate::observability::{distribution_metrics, OperationTimer};
use crate::telemetry::{create_distribution_span, generate_correlation_id};

/// Default claim window
pub const DEFAULT_CLAIM_TIMEOUT_SECONDS: i64 = 300;

pub struct DistributionEngine<S, D> {
    store: Arc<S>,
    directory: D,
    claim_timeout: Duration,
}

impl<S, D> std::fmt::Debug for DistributionEngine<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributionEngine")
            .field("claim_timeout", &self.claim_timeout)
            .finish_non_exhaustive()
    }
}

impl<S: LeadStore, D: AgentDirectory> DistributionEngine<S, D> {
    /// `claim_timeout` below one second is raised to one second so every
    /// window ends strictly after it starts.
    pub fn new(store: Arc<S>, directory: D, claim_timeout: Duration) -> Self {
        Self {
            store,
            directory,
            claim_timeout: claim_timeout.max(Duration::seconds(1)),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn claim_timeout(&self) -> Duration {
        self.claim_timeout
    }

    pub async fn create_lead_and_assign(
        &self,
        fields: NewLead,
    ) -> Result<LeadAssignment, DistributionError> {
        self.create_lead_and_assign_at(fields, Utc::now()).await
    }

    /// Persist a lead in `new` and bind it to a randomly chosen active agent.
    ///
    /// With no active agent the lead stays `new` and the error carries its id
    /// so the caller can retry through [`Self::assign_lead`].
    pub async fn create_lead_and_assign_at(
        &self,
        fields: NewLead,
        now: DateTime<Utc>,
    ) -> Result<LeadAssignment, DistributionError> {
        let fields = validate_submission(fields)?;
        let lead = Lead::from_submission(fields, stored_time(now));
        let lead_id = lead.id;
        let span = create_distribution_span(
            "create_lead",
            Some(&lead_id),
            None,
            &generate_correlation_id(),
        );

        async move {
            let timer = OperationTimer::new("create_lead");
            self.store.insert_lead(&lead).await?;
            distribution_metrics().record_lead_created();
            info!(lead_id = %lead_id, source = ?lead.source, "Lead stored");

            let assignment = self.bind_new_lead(lead_id, now).await;
            timer.finish();
            assignment
        }
        .instrument(span)
        .await
    }

    pub async fn assign_lead(&self, lead_id: LeadId) -> Result<LeadAssignment, DistributionError> {
        self.assign_lead_at(lead_id, Utc::now()).await
    }

    /// Retry assignment for a lead still in `new`
    pub async fn assign_lead_at(
        &self,
        lead_id: LeadId,
        now: DateTime<Utc>,
    ) -> Result<LeadAssignment, DistributionError> {
        let span = create_distribution_span(
            "assign_lead",
            Some(&lead_id),
            None,
            &generate_correlation_id(),
        );

        async move {
            let lead = self.get_lead(lead_id).await?;
            if lead.status != LeadStatus::New {
                return Err(DistributionError::NotAssignable {
                    lead_id,
                    status: lead.status,
                });
            }
            self.bind_new_lead(lead_id, now).await
        }
        .instrument(span)
        .await
    }

    /// Retry every lead stranded in `new`
    pub async fn assign_stranded(&self) -> Result<StrandedReport, DistributionError> {
        self.assign_stranded_at(Utc::now()).await
    }

    pub async fn assign_stranded_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<StrandedReport, DistributionError> {
        let mut report = StrandedReport::default();

        for lead_id in self.store.unassigned_leads().await? {
            match self.bind_new_lead(lead_id, now).await {
                Ok(_) => report.assigned_count += 1,
                Err(DistributionError::NoAgentsAvailable { .. }) => report.stranded_count += 1,
                // assigned by a concurrent caller since the scan
                Err(DistributionError::NotAssignable { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        if report.assigned_count > 0 || report.stranded_count > 0 {
            info!(
                assigned = report.assigned_count,
                stranded = report.stranded_count,
                "Stranded lead pass complete"
            );
        }
        Ok(report)
    }

    pub async fn claim_lead(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
    ) -> Result<ClaimOutcome, DistributionError> {
        self.claim_lead_at(lead_id, agent_id, Utc::now()).await
    }

    /// Claim succeeds only while the lead is `assigned` to `agent_id`.
    /// Losing a race, a repeated claim and an unknown lead all come back as
    /// [`ClaimOutcome::Conflict`] with nothing changed.
    pub async fn claim_lead_at(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome, DistributionError> {
        let span = create_distribution_span(
            "claim_lead",
            Some(&lead_id),
            Some(agent_id.as_str()),
            &generate_correlation_id(),
        );

        async move {
            let outcome = match self.store.claim(lead_id, agent_id, stored_time(now)).await? {
                CasOutcome::Applied => {
                    info!(lead_id = %lead_id, agent_id = %agent_id, "Lead claimed");
                    ClaimOutcome::Claimed
                }
                CasOutcome::Stale => {
                    debug!(lead_id = %lead_id, agent_id = %agent_id, "Claim rejected");
                    ClaimOutcome::Conflict
                }
            };
            distribution_metrics().record_claim(outcome.is_success());
            Ok(outcome)
        }
        .instrument(span)
        .await
    }

    /// Move every lead whose window closed at or before `now` to a different
    /// active agent with a fresh window.
    ///
    /// A lead with no alternative agent keeps its stale agent and timeout and
    /// is counted as unresolved; it is picked up again by the next sweep.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> Result<SweepReport, DistributionError> {
        let correlation_id = generate_correlation_id();
        let span = create_distribution_span("sweep_timeouts", None, None, &correlation_id);

        async move {
            let timer = OperationTimer::new("sweep_timeouts");
            let mut report = SweepReport::default();

            let expired = self.store.expired_assignments(now).await?;
            if expired.is_empty() {
                debug!("No expired assignments");
                return Ok(report);
            }
            let candidates = self.directory.active_agents().await?;

            for assignment in expired {
                let next = match pick_agent(&candidates, Some(&assignment.agent_id)) {
                    Ok(agent) => agent,
                    Err(NoAgentsAvailable) => {
                        warn!(
                            lead_id = %assignment.lead_id,
                            agent_id = %assignment.agent_id,
                            timeout_at = %assignment.timeout_at,
                            "No alternative agent for expired lead"
                        );
                        distribution_metrics().record_unresolved();
                        report.unresolved_count += 1;
                        continue;
                    }
                };

                let window = self.window_for(next.id.clone(), now);
                match self
                    .store
                    .reassign(assignment.lead_id, &assignment.agent_id, &window)
                    .await?
                {
                    CasOutcome::Applied => {
                        info!(
                            lead_id = %assignment.lead_id,
                            from_agent = %assignment.agent_id,
                            to_agent = %next.id,
                            timeout_at = %window.timeout_at,
                            "Lead reassigned after timeout"
                        );
                        distribution_metrics().record_reassignment();
                        report.reassigned_count += 1;
                    }
                    CasOutcome::Stale => {
                        debug!(
                            lead_id = %assignment.lead_id,
                            "Lead changed since scan, skipping"
                        );
                        distribution_metrics().record_contended();
                        report.contended_count += 1;
                    }
                }
            }

            info!(
                reassigned = report.reassigned_count,
                unresolved = report.unresolved_count,
                contended = report.contended_count,
                "Timeout sweep complete"
            );
            timer.finish();
            Ok(report)
        }
        .instrument(span)
        .await
    }

    pub async fn get_lead(&self, lead_id: LeadId) -> Result<Lead, DistributionError> {
        self.store
            .get_lead(lead_id)
            .await?
            .ok_or(DistributionError::LeadNotFound { lead_id })
    }

    pub async fn assignment_history(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<AssignmentRecord>, DistributionError> {
        Ok(self.store.assignment_history(lead_id).await?)
    }

    async fn bind_new_lead(
        &self,
        lead_id: LeadId,
        now: DateTime<Utc>,
    ) -> Result<LeadAssignment, DistributionError> {
        let candidates = self.directory.active_agents().await?;
        let agent = pick_agent(&candidates, None).map_err(|NoAgentsAvailable| {
            warn!(lead_id = %lead_id, "No active agents, lead left unassigned");
            distribution_metrics().record_stranded();
            DistributionError::NoAgentsAvailable {
                lead_id: Some(lead_id),
            }
        })?;

        let window = self.window_for(agent.id.clone(), now);
        match self.store.assign(lead_id, &window).await? {
            CasOutcome::Applied => {
                distribution_metrics().record_assignment();
                info!(
                    lead_id = %lead_id,
                    agent_id = %agent.id,
                    timeout_at = %window.timeout_at,
                    "Lead assigned"
                );
                Ok(LeadAssignment {
                    lead_id,
                    agent_id: window.agent_id,
                    timeout_at: window.timeout_at,
                })
            }
            CasOutcome::Stale => {
                let current = self.get_lead(lead_id).await?;
                Err(DistributionError::NotAssignable {
                    lead_id,
                    status: current.status,
                })
            }
        }
    }

    fn window_for(&self, agent_id: AgentId, now: DateTime<Utc>) -> AssignmentWindow {
        let now = stored_time(now);
        AssignmentWindow {
            agent_id,
            assigned_at: now,
            timeout_at: now + self.claim_timeout,
        }
    }
}

/// Timestamps handed to a store are cut to milliseconds, the finest
/// precision every backend keeps, so callers see exactly what was persisted.
fn stored_time(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(3)
}

fn pick_agent(candidates: &[Agent], exclude: Option<&AgentId>) -> Result<Agent, NoAgentsAvailable> {
    let mut rng = rand::rng();
    select_agent(candidates, exclude, &mut rng).cloned()
}

fn validate_submission(fields: NewLead) -> Result<NewLead, DistributionError> {
    fn non_blank(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    let name = fields.name.trim().to_string();
    if name.is_empty() {
        return Err(DistributionError::InvalidInput { field: "name" });
    }
    let phone = fields.phone.trim().to_string();
    if phone.is_empty() {
        return Err(DistributionError::InvalidInput { field: "phone" });
    }

    Ok(NewLead {
        name,
        phone,
        email: non_blank(fields.email),
        message: non_blank(fields.message),
        project_id: non_blank(fields.project_id),
        source: non_blank(fields.source),
    })
}
