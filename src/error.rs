use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Invalid workflow: {0}")]
    Structural(String),

    #[error("Circular dependency detected at step: {step}")]
    CircularDependency { step: String },

    #[error("No agent available: {0}")]
    AgentUnavailable(String),

    #[error("Task execution failed: {0}")]
    TaskExecution(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Workflow timed out after {0:?}")]
    WorkflowTimeout(Duration),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Unknown agent type: {0}")]
    UnknownAgentType(String),

    #[error("Agent pool is full (max: {max})")]
    AgentPoolFull { max: usize },

    #[error("Agent not found: {id}")]
    AgentNotFound { id: crate::agent::AgentId },

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow already in progress: {0}")]
    WorkflowInProgress(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl Error {
    /// Whether a step attempt that failed with this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TaskExecution(_) | Error::Timeout(_))
    }

    /// Whether this error stops the whole run rather than a single attempt.
    pub fn halts_workflow(&self) -> bool {
        matches!(self, Error::WorkflowTimeout(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
