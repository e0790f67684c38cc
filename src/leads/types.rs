use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque lead identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(Uuid);

impl LeadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for LeadId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Agent identity as stored by the surrounding product
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for AgentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Assigned,
    Claimed,
    Lost,
    Converted,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Assigned => "assigned",
            LeadStatus::Claimed => "claimed",
            LeadStatus::Lost => "lost",
            LeadStatus::Converted => "converted",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(LeadStatus::New),
            "assigned" => Ok(LeadStatus::Assigned),
            "claimed" => Ok(LeadStatus::Claimed),
            "lost" => Ok(LeadStatus::Lost),
            "converted" => Ok(LeadStatus::Converted),
            other => Err(format!("unknown lead status '{other}'")),
        }
    }
}

/// Contact fields submitted by the inquiry form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub message: Option<String>,
    pub project_id: Option<String>,
    pub source: Option<String>,
}

impl NewLead {
    pub fn new(name: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: phone.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub message: Option<String>,
    pub project_id: Option<String>,
    pub source: Option<String>,
    pub status: LeadStatus,
    pub assigned_to: Option<AgentId>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Lead {
    /// Build an unassigned lead from validated contact fields
    pub fn from_submission(fields: NewLead, now: DateTime<Utc>) -> Self {
        Self {
            id: LeadId::new(),
            name: fields.name,
            phone: fields.phone,
            email: fields.email,
            message: fields.message,
            project_id: fields.project_id,
            source: fields.source,
            status: LeadStatus::New,
            assigned_to: None,
            assigned_at: None,
            timeout_at: None,
            claimed_at: None,
            created_at: now,
        }
    }

    /// True when the lead is waiting on an agent and its claim window has closed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == LeadStatus::Assigned && self.timeout_at.is_some_and(|t| t <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
}

impl Agent {
    pub fn new(id: impl Into<AgentId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            phone: None,
            email: None,
            is_active: true,
        }
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Claimed,
    Timeout,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Pending => "pending",
            AssignmentStatus::Claimed => "claimed",
            AssignmentStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AssignmentStatus::Pending),
            "claimed" => Ok(AssignmentStatus::Claimed),
            "timeout" => Ok(AssignmentStatus::Timeout),
            other => Err(format!("unknown assignment status '{other}'")),
        }
    }
}

/// One row of the append-only assignment log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl AssignmentRecord {
    pub fn pending(
        lead_id: LeadId,
        agent_id: AgentId,
        assigned_at: DateTime<Utc>,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            lead_id,
            agent_id,
            status: AssignmentStatus::Pending,
            assigned_at,
            timeout_at,
            resolved_at: None,
        }
    }
}

/// Parameters for binding a lead to an agent for one claim window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignmentWindow {
    pub agent_id: AgentId,
    pub assigned_at: DateTime<Utc>,
    pub timeout_at: DateTime<Utc>,
}

/// Returned by a successful create or manual assign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadAssignment {
    pub lead_id: LeadId,
    pub agent_id: AgentId,
    pub timeout_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    /// The lead was not assigned to this agent when the update ran
    Conflict,
}

impl ClaimOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub reassigned_count: u64,
    pub unresolved_count: u64,
    /// Leads claimed or reassigned by another writer between scan and update
    pub contended_count: u64,
}

impl SweepReport {
    pub fn scanned(&self) -> u64 {
        self.reassigned_count + self.unresolved_count + self.contended_count
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrandedReport {
    pub assigned_count: u64,
    pub stranded_count: u64,
}
