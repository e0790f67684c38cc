// End-to-end lead distribution scenarios against the in-memory store
// Covers intake, claiming, timeout reassignment and the no-agent paths

use chrono::{DateTime, Duration, TimeZone, Utc};
use lead_dispatch::leads::{
    Agent, AgentId, AssignmentStatus, ClaimOutcome, DistributionEngine, DistributionError,
    InMemoryLeadStore, LeadStatus, NewLead,
};
use std::sync::Arc;

type Engine = DistributionEngine<InMemoryLeadStore, Arc<InMemoryLeadStore>>;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn engine_with(agents: Vec<Agent>) -> (Engine, Arc<InMemoryLeadStore>) {
    let store = Arc::new(InMemoryLeadStore::with_agents(agents));
    let engine = DistributionEngine::new(store.clone(), store.clone(), Duration::minutes(5));
    (engine, store)
}

fn three_agents() -> Vec<Agent> {
    vec![
        Agent::new("A", "Amira"),
        Agent::new("B", "Bruno"),
        Agent::new("C", "Chen"),
    ]
}

#[tokio::test]
async fn test_intake_assigns_to_one_of_the_active_agents() {
    let (engine, store) = engine_with(three_agents());

    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    assert!(["A", "B", "C"].contains(&assignment.agent_id.as_str()));
    assert_eq!(assignment.timeout_at, t0() + Duration::minutes(5));

    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Assigned);
    assert_eq!(lead.assigned_to.as_ref(), Some(&assignment.agent_id));
    assert_eq!(lead.assigned_at, Some(t0()));
    assert_eq!(lead.timeout_at, Some(assignment.timeout_at));

    let history = engine.assignment_history(assignment.lead_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AssignmentStatus::Pending);
    assert_eq!(history[0].agent_id, assignment.agent_id);
    assert_eq!(store.leads().await.len(), 1);
}

#[tokio::test]
async fn test_assigned_agent_claims_once() {
    let (engine, _store) = engine_with(three_agents());
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let claim_at = t0() + Duration::minutes(2);
    let first = engine
        .claim_lead_at(assignment.lead_id, &assignment.agent_id, claim_at)
        .await
        .unwrap();
    let second = engine
        .claim_lead_at(assignment.lead_id, &assignment.agent_id, claim_at)
        .await
        .unwrap();

    assert_eq!(first, ClaimOutcome::Claimed);
    assert_eq!(second, ClaimOutcome::Conflict);

    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Claimed);
    assert_eq!(lead.claimed_at, Some(claim_at));

    let history = engine.assignment_history(assignment.lead_id).await.unwrap();
    assert_eq!(history[0].status, AssignmentStatus::Claimed);
    assert_eq!(history[0].resolved_at, Some(claim_at));
}

#[tokio::test]
async fn test_other_agent_cannot_claim() {
    let (engine, _store) = engine_with(three_agents());
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();
    let intruder = ["A", "B", "C"]
        .into_iter()
        .map(AgentId::from)
        .find(|id| *id != assignment.agent_id)
        .unwrap();

    let outcome = engine
        .claim_lead_at(assignment.lead_id, &intruder, t0())
        .await
        .unwrap();

    assert_eq!(outcome, ClaimOutcome::Conflict);
    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Assigned);
    assert_eq!(lead.assigned_to, Some(assignment.agent_id));
}

#[tokio::test]
async fn test_expired_lead_moves_to_a_different_agent() {
    let (engine, _store) = engine_with(three_agents());
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let sweep_at = t0() + Duration::minutes(6);
    let report = engine.sweep_timeouts(sweep_at).await.unwrap();
    assert_eq!(report.reassigned_count, 1);
    assert_eq!(report.unresolved_count, 0);

    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    let next_agent = lead.assigned_to.clone().unwrap();
    assert_ne!(next_agent, assignment.agent_id);
    assert_eq!(lead.status, LeadStatus::Assigned);
    assert_eq!(lead.timeout_at, Some(sweep_at + Duration::minutes(5)));

    let history = engine.assignment_history(assignment.lead_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].status, AssignmentStatus::Timeout);
    assert_eq!(history[0].resolved_at, Some(sweep_at));
    assert_eq!(history[1].status, AssignmentStatus::Pending);
    assert_eq!(history[1].agent_id, next_agent);

    // the timed-out agent lost the lead
    let stale = engine
        .claim_lead_at(assignment.lead_id, &assignment.agent_id, sweep_at)
        .await
        .unwrap();
    assert_eq!(stale, ClaimOutcome::Conflict);

    let fresh = engine
        .claim_lead_at(assignment.lead_id, &next_agent, sweep_at + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(fresh, ClaimOutcome::Claimed);
}

#[tokio::test]
async fn test_sweep_before_deadline_leaves_lead_alone() {
    let (engine, _store) = engine_with(three_agents());
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let report = engine
        .sweep_timeouts(t0() + Duration::minutes(4))
        .await
        .unwrap();

    assert_eq!(report.scanned(), 0);
    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.assigned_to, Some(assignment.agent_id));
}

#[tokio::test]
async fn test_deadline_is_inclusive() {
    let (engine, _store) = engine_with(three_agents());
    engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let report = engine
        .sweep_timeouts(t0() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(report.reassigned_count, 1);
}

#[tokio::test]
async fn test_claim_after_deadline_but_before_sweep_still_wins() {
    let (engine, _store) = engine_with(three_agents());
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let late = t0() + Duration::minutes(7);
    let outcome = engine
        .claim_lead_at(assignment.lead_id, &assignment.agent_id, late)
        .await
        .unwrap();
    assert_eq!(outcome, ClaimOutcome::Claimed);

    let report = engine.sweep_timeouts(late).await.unwrap();
    assert_eq!(report.scanned(), 0);
}

#[tokio::test]
async fn test_no_agents_leaves_lead_unassigned() {
    let (engine, store) = engine_with(Vec::new());

    let err = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap_err();

    let lead_id = match err {
        DistributionError::NoAgentsAvailable { lead_id: Some(id) } => id,
        other => panic!("expected NoAgentsAvailable, got {other:?}"),
    };
    let lead = engine.get_lead(lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::New);
    assert!(lead.assigned_to.is_none());
    assert!(engine.assignment_history(lead_id).await.unwrap().is_empty());

    store.upsert_agent(Agent::new("A", "Amira")).await;
    let assignment = engine.assign_lead_at(lead_id, t0()).await.unwrap();
    assert_eq!(assignment.agent_id.as_str(), "A");
}

#[tokio::test]
async fn test_inactive_agents_are_never_chosen() {
    let (engine, _store) = engine_with(vec![
        Agent::new("A", "Amira").inactive(),
        Agent::new("B", "Bruno"),
        Agent::new("C", "Chen").inactive(),
    ]);

    for i in 0..20 {
        let assignment = engine
            .create_lead_and_assign_at(NewLead::new(format!("Lead {i}"), "555"), t0())
            .await
            .unwrap();
        assert_eq!(assignment.agent_id.as_str(), "B");
    }
}

#[tokio::test]
async fn test_single_agent_timeout_stays_unresolved() {
    let (engine, store) = engine_with(vec![Agent::new("A", "Amira")]);
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let first = engine
        .sweep_timeouts(t0() + Duration::minutes(6))
        .await
        .unwrap();
    assert_eq!(first.reassigned_count, 0);
    assert_eq!(first.unresolved_count, 1);

    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.status, LeadStatus::Assigned);
    assert_eq!(lead.assigned_to.as_ref().map(|a| a.as_str()), Some("A"));
    assert_eq!(lead.timeout_at, Some(t0() + Duration::minutes(5)));
    let history = engine.assignment_history(assignment.lead_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AssignmentStatus::Pending);

    // once a second agent joins, the next sweep moves the lead
    store.upsert_agent(Agent::new("B", "Bruno")).await;
    let second = engine
        .sweep_timeouts(t0() + Duration::minutes(7))
        .await
        .unwrap();
    assert_eq!(second.reassigned_count, 1);
    let lead = engine.get_lead(assignment.lead_id).await.unwrap();
    assert_eq!(lead.assigned_to.as_ref().map(|a| a.as_str()), Some("B"));
}

#[tokio::test]
async fn test_blank_contact_fields_are_rejected() {
    let (engine, store) = engine_with(three_agents());

    let missing_name = engine
        .create_lead_and_assign_at(NewLead::new("   ", "999"), t0())
        .await;
    let missing_phone = engine
        .create_lead_and_assign_at(NewLead::new("Sara", ""), t0())
        .await;

    assert!(matches!(
        missing_name,
        Err(DistributionError::InvalidInput { field: "name" })
    ));
    assert!(matches!(
        missing_phone,
        Err(DistributionError::InvalidInput { field: "phone" })
    ));
    assert!(store.leads().await.is_empty());
}

#[tokio::test]
async fn test_claim_on_unknown_lead_is_a_conflict() {
    let (engine, _store) = engine_with(three_agents());
    let outcome = engine
        .claim_lead_at(lead_dispatch::leads::LeadId::new(), &AgentId::from("A"), t0())
        .await
        .unwrap();
    assert_eq!(outcome, ClaimOutcome::Conflict);
}
