//! Core workflow type definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Retry behaviour for a single step.
///
/// `max_attempts` counts every attempt including the first one. The delay
/// before attempt `n + 1` is `backoff_ms * multiplier^(n - 1)`, or a flat
/// `backoff_ms` when no multiplier is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

impl RetryPolicy {
    /// Retry with a fixed delay between attempts.
    pub fn fixed(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
            multiplier: None,
        }
    }

    /// Retry with a delay that grows by `multiplier` after every failure.
    pub fn exponential(max_attempts: u32, backoff: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            backoff_ms: backoff.as_millis() as u64,
            multiplier: Some(multiplier),
        }
    }

    /// Total attempts allowed, never less than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.backoff_ms as f64;
        let millis = match self.multiplier {
            Some(m) => base * m.powi(attempt.saturating_sub(1) as i32),
            None => base,
        };
        if millis.is_finite() && millis > 0.0 {
            Duration::from_millis(millis.round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

/// One unit of work inside a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    /// Agent type that should run this step.
    pub agent_type: String,
    /// Capabilities the acquired agent must offer, in addition to its type.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_capabilities: Vec<String>,
    /// Human-readable description handed to the agent.
    pub task: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// A failing optional step does not fail its workflow.
    #[serde(default)]
    pub optional: bool,
}

impl WorkflowStep {
    pub fn new(id: &str, agent_type: &str, task: &str) -> Self {
        Self {
            id: id.to_string(),
            agent_type: agent_type.to_string(),
            required_capabilities: Vec::new(),
            task: task.to_string(),
            input: Value::Null,
            timeout_ms: None,
            retry: None,
            optional: false,
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A workflow as submitted by a caller.
///
/// `dependencies` maps a step id to the ids of the steps that must reach a
/// terminal state before it may start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Run each batch's steps concurrently. When false the plan degenerates
    /// into a strict chain in declaration order.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_parallel() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: None,
            steps: Vec::new(),
            dependencies: BTreeMap::new(),
            parallel: true,
            timeout_ms: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Declare that `step` depends on each of `prerequisites`.
    pub fn depends_on(mut self, step: &str, prerequisites: &[&str]) -> Self {
        let entry = self.dependencies.entry(step.to_string()).or_default();
        entry.extend(prerequisites.iter().map(|p| p.to_string()));
        self
    }

    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn get_step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}
