//! Ad hoc task model for distribution across the agent pool.
//!
//! Delegated tasks are independent units of work that are not part of a
//! structured workflow. Each matched task yields a `TaskAssignment` that
//! tracks the assigned agent and the task's progress.

use crate::agent::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Return first 8 characters of the UUID for display.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Scheduling priority. Higher priorities are distributed first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl std::fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "low"),
            TaskPriority::Normal => write!(f, "normal"),
            TaskPriority::High => write!(f, "high"),
            TaskPriority::Critical => write!(f, "critical"),
        }
    }
}

/// A task submitted for distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateTask {
    #[serde(default)]
    pub id: TaskId,
    pub description: String,
    /// Preferred agent type; any type qualifies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub input: Value,
}

impl DelegateTask {
    pub fn new(description: &str) -> Self {
        Self {
            id: TaskId::new(),
            description: description.to_string(),
            agent_type: None,
            required_capabilities: Vec::new(),
            priority: TaskPriority::Normal,
            input: Value::Null,
        }
    }

    pub fn for_type(mut self, agent_type: &str) -> Self {
        self.agent_type = Some(agent_type.to_string());
        self
    }

    pub fn requiring<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }
}

/// Progress of an assigned task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum AssignmentStatus {
    /// Assigned but not yet picked up by the agent.
    #[default]
    Pending,
    Running,
    Completed,
    Failed {
        error: String,
    },
}

impl AssignmentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AssignmentStatus::Completed | AssignmentStatus::Failed { .. }
        )
    }

    /// Pending and running assignments count toward an agent's load.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssignmentStatus::Pending => write!(f, "pending"),
            AssignmentStatus::Running => write!(f, "running"),
            AssignmentStatus::Completed => write!(f, "completed"),
            AssignmentStatus::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// A task bound to the agent selected for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub task: DelegateTask,
    pub agent_id: AgentId,
    pub status: AssignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskAssignment {
    pub fn new(task: DelegateTask, agent_id: AgentId) -> Self {
        Self {
            task,
            agent_id,
            status: AssignmentStatus::Pending,
            output: None,
            assigned_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    /// Transition to Running and record the start time.
    pub fn start(&mut self) {
        self.status = AssignmentStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, output: Value) {
        self.status = AssignmentStatus::Completed;
        self.output = Some(output);
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: &str) {
        self.status = AssignmentStatus::Failed {
            error: error.to_string(),
        };
        self.completed_at = Some(Utc::now());
    }
}

/// A request to provision `count` agents of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequirement {
    pub agent_type: String,
    pub count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl AgentRequirement {
    pub fn new(agent_type: &str, count: usize) -> Self {
        Self {
            agent_type: agent_type.to_string(),
            count,
            capabilities: Vec::new(),
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
