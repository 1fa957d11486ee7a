//! Agent interface consumed by the orchestration core.
//!
//! Concrete agents live outside this crate. They implement [`Agent`] and are
//! created by factories registered with an agent pool.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;

/// Unique identifier for an agent in a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for AgentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Outputs of previously completed steps, keyed by step id.
pub type StepContext = HashMap<String, Value>;

/// A unit of work handed to an agent.
#[derive(Debug, Clone)]
pub struct AgentTask {
    /// Step id for workflow steps, task id for delegated tasks.
    pub id: String,
    pub description: String,
    pub input: Value,
    pub context: Arc<StepContext>,
}

impl AgentTask {
    pub fn new(id: &str, description: &str, input: Value) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            input,
            context: Arc::new(StepContext::new()),
        }
    }

    pub fn with_context(mut self, context: Arc<StepContext>) -> Self {
        self.context = context;
        self
    }
}

/// Settings passed to a factory when spawning an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Capabilities granted on top of what the agent reports itself.
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub settings: Value,
}

impl AgentConfig {
    pub fn with_capabilities<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            settings: Value::Null,
        }
    }
}

/// A worker that can execute tasks of one type.
#[async_trait]
pub trait Agent: Send + Sync {
    /// The type this agent is registered under.
    fn agent_type(&self) -> &str;

    /// Capabilities this agent offers.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run a task and return its output.
    async fn execute(&self, task: AgentTask) -> Result<Value>;
}

/// An [`Agent`] backed by an async closure.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use weave::agent::{Agent, AgentTask, FnAgent};
///
/// # tokio_test::block_on(async {
/// let agent = FnAgent::new("echo", |task: AgentTask| async move { Ok(task.input) });
/// let out = agent.execute(AgentTask::new("t", "echo", json!(7))).await.unwrap();
/// assert_eq!(out, json!(7));
/// # });
/// ```
pub struct FnAgent<F> {
    agent_type: String,
    capabilities: Vec<String>,
    func: F,
}

impl<F> FnAgent<F> {
    pub fn new(agent_type: &str, func: F) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            capabilities: Vec::new(),
            func,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl<F, Fut> Agent for FnAgent<F>
where
    F: Fn(AgentTask) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    fn agent_type(&self) -> &str {
        &self.agent_type
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn execute(&self, task: AgentTask) -> Result<Value> {
        (self.func)(task).await
    }
}
