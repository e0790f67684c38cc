// Race tests: concurrent claims, overlapping sweeps and claim-vs-sweep
// interleavings must leave exactly one winner and a consistent history

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::future::join_all;
use lead_dispatch::leads::{
    Agent, AgentId, AssignmentStatus, ClaimOutcome, DistributionEngine, FileLeadStore,
    InMemoryLeadStore, LeadStatus, LeadStore, NewLead,
};
use std::sync::Arc;
use tempfile::TempDir;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

fn roster() -> Vec<Agent> {
    (0..4)
        .map(|i| Agent::new(format!("agent-{i}"), format!("Agent {i}")))
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let store = Arc::new(InMemoryLeadStore::with_agents(roster()));
    let engine = Arc::new(DistributionEngine::new(
        store.clone(),
        store.clone(),
        Duration::minutes(5),
    ));
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let lead_id = assignment.lead_id;

    let mut handles = Vec::new();
    for _ in 0..32 {
        let engine = engine.clone();
        let agent = assignment.agent_id.clone();
        handles.push(tokio::spawn(async move {
            engine
                .claim_lead_at(lead_id, &agent, t0() + Duration::seconds(30))
                .await
                .unwrap()
        }));
    }

    let outcomes: Vec<ClaimOutcome> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners = outcomes.iter().filter(|o| o.is_success()).count();
    assert_eq!(winners, 1, "exactly one claim must succeed");

    let history = engine.assignment_history(lead_id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, AssignmentStatus::Claimed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overlapping_sweeps_reassign_each_lead_once() {
    let store = Arc::new(InMemoryLeadStore::with_agents(roster()));
    let engine = Arc::new(DistributionEngine::new(
        store.clone(),
        store.clone(),
        Duration::minutes(5),
    ));
    let mut lead_ids = Vec::new();
    for i in 0..10 {
        let assignment = engine
            .create_lead_and_assign_at(NewLead::new(format!("Lead {i}"), "555"), t0())
            .await
            .unwrap();
        lead_ids.push(assignment.lead_id);
    }

    let sweep_at = t0() + Duration::minutes(6);
    let sweeps = (0..6).map(|_| {
        let engine = engine.clone();
        tokio::spawn(async move { engine.sweep_timeouts(sweep_at).await.unwrap() })
    });
    let reports: Vec<_> = join_all(sweeps)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let reassigned: u64 = reports.iter().map(|r| r.reassigned_count).sum();
    assert_eq!(reassigned, lead_ids.len() as u64);

    for lead_id in lead_ids {
        let history = engine.assignment_history(lead_id).await.unwrap();
        assert_eq!(history.len(), 2, "one timeout plus one fresh window");
        let pending = history
            .iter()
            .filter(|r| r.status == AssignmentStatus::Pending)
            .count();
        assert_eq!(pending, 1);
        assert_ne!(history[0].agent_id, history[1].agent_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_claim_racing_sweep_keeps_state_consistent() {
    for _ in 0..20 {
        let store = Arc::new(InMemoryLeadStore::with_agents(roster()));
        let engine = Arc::new(DistributionEngine::new(
            store.clone(),
            store.clone(),
            Duration::minutes(5),
        ));
        let assignment = engine
            .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
            .await
            .unwrap();
        let lead_id = assignment.lead_id;
        let race_at = t0() + Duration::minutes(6);

        let claim = {
            let engine = engine.clone();
            let agent = assignment.agent_id.clone();
            tokio::spawn(async move {
                engine
                    .claim_lead_at(lead_id, &agent, race_at)
                    .await
                    .unwrap()
            })
        };
        let sweep = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sweep_timeouts(race_at).await.unwrap() })
        };
        let (claim, sweep) = (claim.await.unwrap(), sweep.await.unwrap());

        let lead = engine.get_lead(lead_id).await.unwrap();
        let history = engine.assignment_history(lead_id).await.unwrap();
        match claim {
            ClaimOutcome::Claimed => {
                assert_eq!(lead.status, LeadStatus::Claimed);
                assert_eq!(sweep.reassigned_count, 0);
                assert_eq!(history.len(), 1);
                assert_eq!(history[0].status, AssignmentStatus::Claimed);
            }
            ClaimOutcome::Conflict => {
                assert_eq!(lead.status, LeadStatus::Assigned);
                assert_eq!(sweep.reassigned_count, 1);
                assert_ne!(lead.assigned_to, Some(assignment.agent_id.clone()));
                assert_eq!(history.len(), 2);
                assert_eq!(history[0].status, AssignmentStatus::Timeout);
            }
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_file_store_claims_across_handles_have_one_winner() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("leads.json");

    let seed = FileLeadStore::new(&path);
    for agent in roster() {
        seed.upsert_agent(agent).await.unwrap();
    }
    let engine = DistributionEngine::new(Arc::new(seed.clone()), seed, Duration::minutes(5));
    let assignment = engine
        .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
        .await
        .unwrap();

    let lead_id = assignment.lead_id;

    // separate store handles stand in for separate processes
    let claims = (0..8).map(|_| {
        let store = FileLeadStore::new(&path);
        let agent: AgentId = assignment.agent_id.clone();
        tokio::spawn(async move {
            store
                .claim(lead_id, &agent, t0() + Duration::seconds(10))
                .await
                .unwrap()
        })
    });
    let outcomes: Vec<_> = join_all(claims)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(outcomes.iter().filter(|o| o.applied()).count(), 1);

    let reopened = FileLeadStore::new(&path);
    let lead = reopened.get_lead(lead_id).await.unwrap().unwrap();
    assert_eq!(lead.status, LeadStatus::Claimed);
}

#[cfg(feature = "database")]
mod sqlite_races {
    use super::*;
    use lead_dispatch::leads::SqliteLeadStore;
    use lead_dispatch::DatabaseManager;

    type SqliteEngine = DistributionEngine<SqliteLeadStore, Arc<SqliteLeadStore>>;

    async fn sqlite_engine(temp_dir: &TempDir) -> Arc<SqliteEngine> {
        let url = format!("sqlite://{}", temp_dir.path().join("leads.db").display());
        let manager = DatabaseManager::new(&url, 8, true).await.unwrap();
        let store = Arc::new(SqliteLeadStore::new(manager.pool().clone()));
        for agent in roster() {
            store.upsert_agent(&agent).await.unwrap();
        }
        Arc::new(DistributionEngine::new(
            store.clone(),
            store,
            Duration::minutes(5),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_concurrent_claims_have_one_winner() {
        let temp_dir = TempDir::new().unwrap();
        let engine = sqlite_engine(&temp_dir).await;
        let assignment = engine
            .create_lead_and_assign_at(NewLead::new("Sara", "999"), t0())
            .await
            .unwrap();
        let lead_id = assignment.lead_id;

        let claims = (0..32).map(|_| {
            let engine = engine.clone();
            let agent = assignment.agent_id.clone();
            tokio::spawn(async move {
                engine
                    .claim_lead_at(lead_id, &agent, t0() + Duration::seconds(30))
                    .await
            })
        });
        let results: Vec<_> = join_all(claims)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert!(errors.is_empty(), "storage errors under contention: {errors:?}");
        let winners = results
            .iter()
            .filter(|r| matches!(r, Ok(ClaimOutcome::Claimed)))
            .count();
        assert_eq!(winners, 1);

        let lead = engine.get_lead(lead_id).await.unwrap();
        assert_eq!(lead.status, LeadStatus::Claimed);
        let history = engine.assignment_history(lead_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, AssignmentStatus::Claimed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_overlapping_sweeps_reassign_each_lead_once() {
        let temp_dir = TempDir::new().unwrap();
        let engine = sqlite_engine(&temp_dir).await;
        let mut lead_ids = Vec::new();
        for i in 0..19 {
            let assignment = engine
                .create_lead_and_assign_at(NewLead::new(format!("Lead {i}"), "555"), t0())
                .await
                .unwrap();
            lead_ids.push(assignment.lead_id);
        }

        let sweep_at = t0() + Duration::minutes(6);
        let sweeps = (0..8).map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sweep_timeouts(sweep_at).await })
        });
        let results: Vec<_> = join_all(sweeps)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        let errors: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
        assert!(errors.is_empty(), "storage errors under contention: {errors:?}");
        let reassigned: u64 = results
            .iter()
            .filter_map(|r| r.as_ref().ok())
            .map(|report| report.reassigned_count)
            .sum();
        assert_eq!(reassigned, lead_ids.len() as u64);

        for lead_id in lead_ids {
            let history = engine.assignment_history(lead_id).await.unwrap();
            let pending: Vec<_> = history
                .iter()
                .filter(|r| r.status == AssignmentStatus::Pending)
                .collect();
            assert_eq!(pending.len(), 1);
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].status, AssignmentStatus::Timeout);
            assert_ne!(history[0].agent_id, history[1].agent_id);

            let lead = engine.get_lead(lead_id).await.unwrap();
            assert_eq!(lead.assigned_to.as_ref(), Some(&pending[0].agent_id));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sqlite_claim_racing_sweep_keeps_state_consistent() {
        let temp_dir = TempDir::new().unwrap();
        let engine = sqlite_engine(&temp_dir).await;

        for i in 0..10 {
            let assignment = engine
                .create_lead_and_assign_at(NewLead::new(format!("Lead {i}"), "555"), t0())
                .await
                .unwrap();
            let lead_id = assignment.lead_id;
            let race_at = t0() + Duration::minutes(6);

            let claim = {
                let engine = engine.clone();
                let agent = assignment.agent_id.clone();
                tokio::spawn(async move { engine.claim_lead_at(lead_id, &agent, race_at).await })
            };
            let sweep = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.sweep_timeouts(race_at).await })
            };
            let claim = claim.await.unwrap().unwrap();
            sweep.await.unwrap().unwrap();

            let lead = engine.get_lead(lead_id).await.unwrap();
            let history = engine.assignment_history(lead_id).await.unwrap();
            match claim {
                ClaimOutcome::Claimed => {
                    assert_eq!(lead.status, LeadStatus::Claimed);
                    assert_eq!(history.len(), 1);
                }
                ClaimOutcome::Conflict => {
                    assert_eq!(lead.status, LeadStatus::Assigned);
                    assert_ne!(lead.assigned_to, Some(assignment.agent_id.clone()));
                    assert_eq!(history.len(), 2);
                }
            }
        }
    }
}
