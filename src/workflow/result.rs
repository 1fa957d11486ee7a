//! Results recorded for steps and whole workflow runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::agent::AgentId;
use crate::workflow::WorkflowState;

/// Outcome of a single step. Recorded once per step per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<AgentId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn succeeded(
        step_id: &str,
        output: Value,
        attempts: u32,
        agent_id: Option<AgentId>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: true,
            output: Some(output),
            error: None,
            attempts,
            agent_id,
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(
        step_id: &str,
        error: impl std::fmt::Display,
        attempts: u32,
        agent_id: Option<AgentId>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            success: false,
            output: None,
            error: Some(error.to_string()),
            attempts,
            agent_id,
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// A result for a step that never ran.
    pub fn not_run(step_id: &str, reason: impl std::fmt::Display) -> Self {
        Self::failed(step_id, reason, 0, None, Utc::now())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.completed_at - self.started_at
    }
}

/// Outcome of a whole workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub workflow_id: String,
    pub success: bool,
    pub state: WorkflowState,
    pub step_results: HashMap<String, StepResult>,
    /// Outputs of every successful step keyed by step id.
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// A run that was rejected before any step executed.
    pub fn rejected(
        workflow_id: &str,
        error: impl std::fmt::Display,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            success: false,
            state: WorkflowState::Failed,
            step_results: HashMap::new(),
            output: Value::Object(Map::new()),
            error: Some(error.to_string()),
            started_at,
            completed_at: Utc::now(),
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    pub fn failed_steps(&self) -> Vec<&StepResult> {
        self.step_results.values().filter(|r| !r.success).collect()
    }
}

/// Collect successful step outputs into one JSON object.
pub fn aggregate_output(results: &HashMap<String, StepResult>) -> Value {
    let mut map = Map::new();
    let mut ids: Vec<&String> = results.keys().collect();
    ids.sort();
    for id in ids {
        if let Some(StepResult {
            success: true,
            output: Some(output),
            ..
        }) = results.get(id)
        {
            map.insert(id.clone(), output.clone());
        }
    }
    Value::Object(map)
}
