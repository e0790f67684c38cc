// SQLite lead store. Each transition opens a transaction whose first
// statement is the guarded UPDATE on `leads`; zero affected rows means the
// expected state is gone and the transaction is rolled back untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::directory::{AgentDirectory, AgentRoster};
use super::error::StoreError;
use super::store::{CasOutcome, ExpiredAssignment, LeadStore};
use super::types::{
    Agent, AgentId, AssignmentRecord, AssignmentStatus, AssignmentWindow, Lead, LeadId,
    LeadStatus,
};

const LEAD_COLUMNS: &str = "id, name, phone, email, message, project_id, source, status, \
     assigned_to, assigned_at, timeout_at, claimed_at, created_at";

#[derive(Debug, Clone)]
pub struct SqliteLeadStore {
    pool: SqlitePool,
}

impl SqliteLeadStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn upsert_agent(&self, agent: &Agent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agents (id, name, phone, email, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                phone = excluded.phone,
                email = excluded.email,
                is_active = excluded.is_active
            "#,
        )
        .bind(agent.id.as_str())
        .bind(&agent.name)
        .bind(&agent.phone)
        .bind(&agent.email)
        .bind(agent.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_agent_active(
        &self,
        agent_id: &AgentId,
        active: bool,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE agents SET is_active = ?1 WHERE id = ?2")
            .bind(active)
            .bind(agent_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query("SELECT id, name, phone, email, is_active FROM agents ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(agent_from_row).collect()
    }

    pub async fn leads(&self) -> Result<Vec<Lead>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {LEAD_COLUMNS} FROM leads ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(lead_from_row).collect()
    }
}

fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::<Utc>::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt {
        reason: format!("timestamp {ms} out of range"),
    })
}

fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>, StoreError> {
    ms.map(from_millis).transpose()
}

fn parse_lead_id(raw: &str) -> Result<LeadId, StoreError> {
    raw.parse().map_err(|e| StoreError::Corrupt {
        reason: format!("lead id '{raw}': {e}"),
    })
}

fn agent_from_row(row: &SqliteRow) -> Result<Agent, StoreError> {
    Ok(Agent {
        id: AgentId::new(row.try_get::<String, _>("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        is_active: row.try_get("is_active")?,
    })
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let assigned_to: Option<String> = row.try_get("assigned_to")?;

    Ok(Lead {
        id: parse_lead_id(&id)?,
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        email: row.try_get("email")?,
        message: row.try_get("message")?,
        project_id: row.try_get("project_id")?,
        source: row.try_get("source")?,
        status: status
            .parse::<LeadStatus>()
            .map_err(|reason| StoreError::Corrupt { reason })?,
        assigned_to: assigned_to.map(AgentId::new),
        assigned_at: opt_from_millis(row.try_get("assigned_at")?)?,
        timeout_at: opt_from_millis(row.try_get("timeout_at")?)?,
        claimed_at: opt_from_millis(row.try_get("claimed_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<AssignmentRecord, StoreError> {
    let id: String = row.try_get("id")?;
    let lead_id: String = row.try_get("lead_id")?;
    let status: String = row.try_get("status")?;

    Ok(AssignmentRecord {
        id: Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt {
            reason: format!("assignment id '{id}': {e}"),
        })?,
        lead_id: parse_lead_id(&lead_id)?,
        agent_id: AgentId::new(row.try_get::<String, _>("agent_id")?),
        status: status
            .parse::<AssignmentStatus>()
            .map_err(|reason| StoreError::Corrupt { reason })?,
        assigned_at: from_millis(row.try_get("assigned_at")?)?,
        timeout_at: from_millis(row.try_get("timeout_at")?)?,
        resolved_at: opt_from_millis(row.try_get("resolved_at")?)?,
    })
}

async fn insert_pending(
    conn: &mut sqlx::SqliteConnection,
    lead_id: LeadId,
    window: &AssignmentWindow,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO lead_assignments (id, lead_id, agent_id, status, assigned_at, timeout_at)
        VALUES (?1, ?2, ?3, 'pending', ?4, ?5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(lead_id.to_string())
    .bind(window.agent_id.as_str())
    .bind(millis(window.assigned_at))
    .bind(millis(window.timeout_at))
    .execute(conn)
    .await?;

    Ok(())
}

#[async_trait]
impl LeadStore for SqliteLeadStore {
    async fn insert_lead(&self, lead: &Lead) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO leads ({LEAD_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ))
        .bind(lead.id.to_string())
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.email)
        .bind(&lead.message)
        .bind(&lead.project_id)
        .bind(&lead.source)
        .bind(lead.status.as_str())
        .bind(lead.assigned_to.as_ref().map(|a| a.as_str().to_string()))
        .bind(lead.assigned_at.map(millis))
        .bind(lead.timeout_at.map(millis))
        .bind(lead.claimed_at.map(millis))
        .bind(millis(lead.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_lead(&self, lead_id: LeadId) -> Result<Option<Lead>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"))
            .bind(lead_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(lead_from_row).transpose()
    }

    async fn assign(
        &self,
        lead_id: LeadId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'assigned', assigned_to = ?1, assigned_at = ?2, timeout_at = ?3
            WHERE id = ?4 AND status = 'new'
            "#,
        )
        .bind(window.agent_id.as_str())
        .bind(millis(window.assigned_at))
        .bind(millis(window.timeout_at))
        .bind(lead_id.to_string())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        insert_pending(&mut tx, lead_id, window).await?;
        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn claim(
        &self,
        lead_id: LeadId,
        agent_id: &AgentId,
        now: DateTime<Utc>,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE leads
            SET status = 'claimed', claimed_at = ?1, assigned_at = NULL, timeout_at = NULL
            WHERE id = ?2 AND status = 'assigned' AND assigned_to = ?3
            "#,
        )
        .bind(millis(now))
        .bind(lead_id.to_string())
        .bind(agent_id.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        sqlx::query(
            r#"
            UPDATE lead_assignments
            SET status = 'claimed', resolved_at = ?1
            WHERE lead_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(millis(now))
        .bind(lead_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn reassign(
        &self,
        lead_id: LeadId,
        previous: &AgentId,
        window: &AssignmentWindow,
    ) -> Result<CasOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let now = millis(window.assigned_at);

        let updated = sqlx::query(
            r#"
            UPDATE leads
            SET assigned_to = ?1, assigned_at = ?2, timeout_at = ?3
            WHERE id = ?4 AND status = 'assigned' AND assigned_to = ?5 AND timeout_at <= ?2
            "#,
        )
        .bind(window.agent_id.as_str())
        .bind(now)
        .bind(millis(window.timeout_at))
        .bind(lead_id.to_string())
        .bind(previous.as_str())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        sqlx::query(
            r#"
            UPDATE lead_assignments
            SET status = 'timeout', resolved_at = ?1
            WHERE lead_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(lead_id.to_string())
        .execute(&mut *tx)
        .await?;

        insert_pending(&mut tx, lead_id, window).await?;
        tx.commit().await?;
        debug!(lead_id = %lead_id, agent_id = %window.agent_id, "Lead reassigned in database");
        Ok(CasOutcome::Applied)
    }

    async fn expired_assignments(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExpiredAssignment>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, assigned_to, timeout_at
            FROM leads
            WHERE status = 'assigned' AND timeout_at <= ?1
            ORDER BY timeout_at ASC
            "#,
        )
        .bind(millis(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Ok(ExpiredAssignment {
                    lead_id: parse_lead_id(&id)?,
                    agent_id: AgentId::new(row.try_get::<String, _>("assigned_to")?),
                    timeout_at: from_millis(row.try_get("timeout_at")?)?,
                })
            })
            .collect()
    }

    async fn unassigned_leads(&self) -> Result<Vec<LeadId>, StoreError> {
        let rows = sqlx::query("SELECT id FROM leads WHERE status = 'new' ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| parse_lead_id(&row.try_get::<String, _>("id")?))
            .collect()
    }

    async fn assignment_history(
        &self,
        lead_id: LeadId,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, lead_id, agent_id, status, assigned_at, timeout_at, resolved_at
            FROM lead_assignments
            WHERE lead_id = ?1
            ORDER BY rowid ASC
            "#,
        )
        .bind(lead_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}

#[async_trait]
impl AgentDirectory for SqliteLeadStore {
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, name, phone, email, is_active FROM agents WHERE is_active = 1 ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(agent_from_row).collect()
    }
}

#[async_trait]
impl AgentRoster for SqliteLeadStore {
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError> {
        SqliteLeadStore::upsert_agent(self, &agent).await
    }

    async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> Result<bool, StoreError> {
        SqliteLeadStore::set_agent_active(self, agent_id, active).await
    }

    async fn agents(&self) -> Result<Vec<Agent>, StoreError> {
        SqliteLeadStore::agents(self).await
    }
}
