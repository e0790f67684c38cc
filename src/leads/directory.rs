// Agent Directory - read-only view of the agents eligible for new work

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::error::StoreError;
use super::types::{Agent, AgentId};

#[async_trait]
pub trait AgentDirectory: Send + Sync {
    /// Agents with `is_active = true` at the time of the call
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError>;
}

#[async_trait]
impl<T: AgentDirectory + ?Sized> AgentDirectory for Arc<T> {
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError> {
        (**self).active_agents().await
    }
}

/// Writable side of the roster, used by operator tooling
#[async_trait]
pub trait AgentRoster: AgentDirectory {
    async fn upsert_agent(&self, agent: Agent) -> Result<(), StoreError>;

    /// Returns false when no agent has that id
    async fn set_agent_active(&self, agent_id: &AgentId, active: bool) -> Result<bool, StoreError>;

    /// Every agent, active or not
    async fn agents(&self) -> Result<Vec<Agent>, StoreError>;
}

/// Directory wrapper that serves the active roster from a short-lived cache.
///
/// Staleness only changes who is offered the next lead; claims are checked
/// against the lead row itself.
pub struct CachedAgentDirectory<D> {
    inner: D,
    cache: Cache<(), Arc<Vec<Agent>>>,
}

impl<D: AgentDirectory> CachedAgentDirectory<D> {
    pub fn new(inner: D, ttl: Duration) -> Self {
        let cache = Cache::builder().max_capacity(1).time_to_live(ttl).build();
        Self { inner, cache }
    }

    /// Drop the cached roster so the next read goes to the backend
    pub fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl<D: AgentDirectory> AgentDirectory for CachedAgentDirectory<D> {
    async fn active_agents(&self) -> Result<Vec<Agent>, StoreError> {
        if let Some(cached) = self.cache.get(&()).await {
            debug!(agents = cached.len(), "Agent roster cache hit");
            return Ok(cached.as_ref().clone());
        }

        let agents = self.inner.active_agents().await?;
        self.cache.insert((), Arc::new(agents.clone())).await;
        debug!(agents = agents.len(), "Agent roster refreshed");
        Ok(agents)
    }
}
