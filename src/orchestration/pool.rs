//! Agent pool interface and an in-process implementation.
//!
//! The orchestration core only talks to agents through [`AgentPool`]. The
//! pool owns agent handles and their load counters; callers never mutate
//! either directly. [`LocalAgentPool`] keeps agents in memory, spawns them
//! from registered factories, and tracks load with atomic counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::agent::{Agent, AgentConfig, AgentId, AgentTask};
use crate::error::{Error, Result};

/// Creates agents of one type from a spawn config.
pub type AgentFactory = Arc<dyn Fn(&AgentConfig) -> Result<Arc<dyn Agent>> + Send + Sync>;

/// A handle to an agent owned by a pool.
///
/// Clones share the same agent and load counter.
#[derive(Clone)]
pub struct AgentHandle {
    id: AgentId,
    agent_type: String,
    capabilities: BTreeSet<String>,
    agent: Arc<dyn Agent>,
    load: Arc<AtomicUsize>,
    spawned_at: DateTime<Utc>,
}

impl AgentHandle {
    /// Wrap an agent. Capabilities are the agent's own plus `extra`.
    pub fn new(agent: Arc<dyn Agent>, extra: &[String]) -> Self {
        let mut capabilities: BTreeSet<String> = agent.capabilities().into_iter().collect();
        capabilities.extend(extra.iter().cloned());
        Self {
            id: AgentId::new(),
            agent_type: agent.agent_type().to_string(),
            capabilities,
            agent,
            load: Arc::new(AtomicUsize::new(0)),
            spawned_at: Utc::now(),
        }
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn agent_type(&self) -> &str {
        &self.agent_type
    }

    pub fn capabilities(&self) -> &BTreeSet<String> {
        &self.capabilities
    }

    /// Whether this agent offers every capability in `required`.
    pub fn has_capabilities(&self, required: &[String]) -> bool {
        required.iter().all(|c| self.capabilities.contains(c))
    }

    /// Number of executions currently in flight on this agent.
    pub fn load(&self) -> usize {
        self.load.load(Ordering::SeqCst)
    }

    pub fn spawned_at(&self) -> DateTime<Utc> {
        self.spawned_at
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    /// Count one execution against this agent until the guard drops.
    pub fn begin_work(&self) -> LoadGuard {
        self.load.fetch_add(1, Ordering::SeqCst);
        LoadGuard {
            load: Arc::clone(&self.load),
        }
    }
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.id)
            .field("agent_type", &self.agent_type)
            .field("capabilities", &self.capabilities)
            .field("load", &self.load())
            .finish()
    }
}

/// Decrements an agent's load counter on drop.
pub struct LoadGuard {
    load: Arc<AtomicUsize>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        self.load.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The pool of agents consumed by the orchestration core.
#[async_trait]
pub trait AgentPool: Send + Sync {
    /// Create a new agent of `agent_type`.
    async fn spawn(&self, agent_type: &str, config: AgentConfig) -> Result<AgentHandle>;

    /// Pick an agent of `agent_type` offering every `required` capability.
    async fn acquire(&self, agent_type: &str, required: &[String]) -> Option<AgentHandle>;

    /// Hint that the caller is done with `handle`.
    async fn release(&self, _handle: &AgentHandle) {}

    /// Run a task on the agent behind `handle`.
    async fn execute(&self, handle: &AgentHandle, task: AgentTask) -> Result<Value> {
        let _guard = handle.begin_work();
        handle.agent().execute(task).await
    }

    /// Agents of `agent_type` in registration order.
    async fn list_by_type(&self, agent_type: &str) -> Vec<AgentHandle>;

    /// Every agent in registration order.
    async fn list_all(&self) -> Vec<AgentHandle>;
}

/// In-memory agent pool backed by registered factories.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use serde_json::json;
/// use weave::agent::{Agent, AgentConfig, AgentTask, FnAgent};
/// use weave::orchestration::{AgentPool, LocalAgentPool};
///
/// # tokio_test::block_on(async {
/// let pool = LocalAgentPool::new();
/// pool.register("echo", |_config: &AgentConfig| {
///     let agent: Arc<dyn Agent> =
///         Arc::new(FnAgent::new("echo", |t: AgentTask| async move { Ok(t.input) }));
///     Ok(agent)
/// })
/// .await;
///
/// let handle = pool.spawn("echo", AgentConfig::default()).await.unwrap();
/// let out = pool.execute(&handle, AgentTask::new("t", "echo", json!(1))).await.unwrap();
/// assert_eq!(out, json!(1));
/// # });
/// ```
pub struct LocalAgentPool {
    factories: RwLock<HashMap<String, AgentFactory>>,
    /// Agents in registration order.
    agents: RwLock<Vec<AgentHandle>>,
    max_agents: Option<usize>,
}

impl LocalAgentPool {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            agents: RwLock::new(Vec::new()),
            max_agents: None,
        }
    }

    /// Create a pool that refuses to grow beyond `max_agents`.
    pub fn with_capacity(max_agents: usize) -> Self {
        Self {
            max_agents: Some(max_agents),
            ..Self::new()
        }
    }

    /// Register a factory for `agent_type`, replacing any previous one.
    pub async fn register<F>(&self, agent_type: &str, factory: F)
    where
        F: Fn(&AgentConfig) -> Result<Arc<dyn Agent>> + Send + Sync + 'static,
    {
        self.factories
            .write()
            .await
            .insert(agent_type.to_string(), Arc::new(factory));
    }

    /// Add an already constructed agent to the pool.
    pub async fn insert(&self, agent: Arc<dyn Agent>) -> Result<AgentHandle> {
        self.insert_handle(AgentHandle::new(agent, &[])).await
    }

    async fn insert_handle(&self, handle: AgentHandle) -> Result<AgentHandle> {
        let mut agents = self.agents.write().await;
        if let Some(max) = self.max_agents {
            if agents.len() >= max {
                return Err(Error::AgentPoolFull { max });
            }
        }
        debug!(agent_id = %handle.id(), agent_type = handle.agent_type(), "agent added to pool");
        agents.push(handle.clone());
        Ok(handle)
    }

    /// Remove an agent from the pool.
    pub async fn remove(&self, id: &AgentId) -> Result<()> {
        let mut agents = self.agents.write().await;
        let position = agents
            .iter()
            .position(|h| h.id() == *id)
            .ok_or(Error::AgentNotFound { id: *id })?;
        agents.remove(position);
        Ok(())
    }

    pub async fn get(&self, id: &AgentId) -> Option<AgentHandle> {
        self.agents.read().await.iter().find(|h| h.id() == *id).cloned()
    }

    pub async fn agent_count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_registered(&self, agent_type: &str) -> bool {
        self.factories.read().await.contains_key(agent_type)
    }

    pub fn max_agents(&self) -> Option<usize> {
        self.max_agents
    }
}

impl Default for LocalAgentPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentPool for LocalAgentPool {
    async fn spawn(&self, agent_type: &str, config: AgentConfig) -> Result<AgentHandle> {
        let factory = self
            .factories
            .read()
            .await
            .get(agent_type)
            .cloned()
            .ok_or_else(|| Error::UnknownAgentType(agent_type.to_string()))?;

        let agent = factory(&config)?;
        self.insert_handle(AgentHandle::new(agent, &config.capabilities))
            .await
    }

    /// Least-loaded matching agent, earliest registered on ties.
    async fn acquire(&self, agent_type: &str, required: &[String]) -> Option<AgentHandle> {
        let agents = self.agents.read().await;
        let mut best: Option<&AgentHandle> = None;
        for handle in agents
            .iter()
            .filter(|h| h.agent_type() == agent_type && h.has_capabilities(required))
        {
            if best.map_or(true, |b| handle.load() < b.load()) {
                best = Some(handle);
            }
        }
        best.cloned()
    }

    async fn list_by_type(&self, agent_type: &str) -> Vec<AgentHandle> {
        self.agents
            .read()
            .await
            .iter()
            .filter(|h| h.agent_type() == agent_type)
            .cloned()
            .collect()
    }

    async fn list_all(&self) -> Vec<AgentHandle> {
        self.agents.read().await.clone()
    }
}
