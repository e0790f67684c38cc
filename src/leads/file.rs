// JSON state file backend for single-host deployments and the CLI.
//
// Every operation holds an exclusive fd-lock on a sidecar `.lock` file for
// its whole load-check-write cycle, so conditional updates stay atomic
// across processes. The state file itself is replaced by rename.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::directory::{AgentDirectory, AgentRoster};
use super::error::StoreError;
use super::ledger::LeadLedger;
use super::store::{CasOutcome, ExpiredAssignment, LeadStore};
use super::types::{Agent, AgentId, AssignmentRecord, AssignmentWindow, Lead, LeadId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

#[derive(Debug, Clone)]
pub struct FileLeadStore {
    path: PathBuf,
}

impl FileLeadStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        self.with_ledger(Access::Write, move |ledger| ledger.upsert_agent(agent))
            .await
    }

    pub async fn set_agent_active(
        &self,
        agent_id: &AgentId,
        active: bool,
    ) -> Result<bool, StoreError> {
        let agent_id = agent_id.clone();
        self.with_ledger(Access::Write, move |ledger| {
            ledger.set_agent_active(&agent_id, active)
        })
        .await
    }

    pub async fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.with_ledger(Access::Read, |ledger| ledger.agents()).await
    }

    pub async fn leads(&self) -> Result<Vec<Lead>, StoreError> {
        self.with_ledger(Access::Read, |ledger| ledger.leads().cloned().collect())
            .await
    }

    async fn with_ledger<T, F>(&self, access: Access, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut LeadLedger) -> T + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || locked_apply(&path, access, op))
            .await
            .map_err(|e| StoreError::Lock {
                reason: format!("state file task failed: {e}"),
            })?
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn load_ledger(path: &Path) -> Result<LeadLedger, StoreError> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(LeadLedger::new()),
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LeadLedger::new()),
        Err(e) => Err(e.into()),
    }
}

fn persist_ledger(path: &Path, ledger: &LeadLedger) -> Result<(), StoreError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let json = serde_json::to_vec_pretty(ledger)?;
    let mut tmp = File::create(&tmp_path)?;
    tmp.write_all(&json)?;
    tmp.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn locked_apply<T, F>(path: &Path, access: Access, op: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut LeadLedger) -> T,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    let mut lock = RwLock::new(lock_file);

    match access {
        Access::Read => {
            let _guard = lock.read().map_err(|e| StoreError::Lock {
                reason: e.to_string(),
            })?;
            let mut ledger = load_ledger(path)?;
            Ok(op(&mut ledger))
        }
        Access::Write => {
            let _guard = lock.write().map_err(|e| StoreError::Lock {
                reason: e.to_string(),
            })?;
            let mut ledger = load_ledger(path)?;
            let result = op(&mut ledger);
            persist_ledger(path, &ledger)?;
            debug!(path = %path.display(), "Lead state file updated");
            Ok(result)
        }
    }
}

#[async_trait]
impl LeadStore for FileLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        let lead = lead.clone();
        self.with_ledger(Access::Write, move |ledger| ledger.insert_lead(lead))
            .await
    }

    async fn get_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, StoreError> {
        self.with_ledger(Access::Read, move |ledger| ledger.lead(lead_id).cloned())
            .await
    }

    async fn assign(
        &self,
        lead_id: LeadId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        let window = window.clone();
        self.with_ledger(Access::Write, move |ledger| ledger.assign(lead_id, &window))
            .await
    }

    async fn claim(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let agent_id = agent_id.clone();
        self.with_ledger(Access::Write, move |ledger| {
            ledger.claim(lead_id, &agent_id, now)
        })
        .await
    }

    async fn reassign(
        &self,
        lead_id: LeadId,
        previous: &AgentId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        let previous = previous.clone();
        let window = window.clone();
        self.with_ledger(Access::Write, move |ledger| {
            ledger.reassign(lead_id, &previous, &window)
        })
        .await
    }

    async fn expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAssignment>, StoreError> {
        self.with_ledger(Access::Read, move |ledger| ledger.expired_assignments(now))
            .await
    }

    async fn unassigned_leads(&self) -> Result<Vec<LeadId>, StoreError> {
        self.with_ledger(Access::Read, |ledger| ledger.unassigned_leads())
            .await
    }

    async fn assignment_history(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        self.with_ledger(Access::Read, move |ledger| {
            ledger.assignment_history(lead_id)
        })
        .await
    }
}

#[async_trait]
impl AgentDirectory for FileLeadStore {
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError> {
        self.with_ledger(Access::Read, |ledger| ledger.active_agents())
            .await
    }
}

#[async_trait]
impl AgentRoster for FileLeadStore {
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        FileLeadStore::upsert_agent(self, agent).await
    }

    async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> Result<bool, StoreError> {
        FileLeadStore::set_agent_active(self, agent_id, active).await
    }

    async fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        FileLeadStore::agents(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leads::types::{LeadStatus, NewLead};
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state").join("leads.json");
        let now = Utc::now();

        let store = FileLeadStore::new(&path);
        store.upsert_agent(Agent::new("agent-a", "Alice")).await.unwrap();
        let lead = Lead::from_submission(NewLead::new("Sara", "999"), now);
        store.insert_lead(&lead).await.unwrap();
        let window = AssignmentWindow {
            agent_id: AgentId::new("agent-a"),
            assigned_at: now,
            timeout_at: now + Duration::minutes(5),
        };
        assert!(store.assign(lead.id, &window).await.unwrap().applied());

        let reopened = FileLeadStore::new(&path);
        let stored = reopened.get_lead(lead.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LeadStatus::Assigned);
        assert_eq!(reopened.active_agents().await.unwrap().len(), 1);
        assert_eq!(reopened.assignment_history(lead.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_reads_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileLeadStore::new(temp_dir.path().join("absent.json"));

        assert!(store.active_agents().await.unwrap().is_empty());
        assert!(store.unassigned_leads().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("leads.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileLeadStore::new(&path);
        let err = store.active_agents().await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
