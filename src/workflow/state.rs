//! Workflow run state machine with transition validation.
//!
//! A run moves through `validating -> planning -> running` and ends in
//! either `completed` or `failed`. Validation and planning may fail directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Lifecycle state of a single workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Validating,
    Planning,
    Running,
    Completed,
    Failed,
}

impl WorkflowState {
    /// Whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// Check if moving from this state to `target` is allowed.
    pub fn can_transition(&self, target: WorkflowState) -> bool {
        matches!(
            (self, target),
            (WorkflowState::Validating, WorkflowState::Planning)
                | (WorkflowState::Validating, WorkflowState::Failed)
                | (WorkflowState::Planning, WorkflowState::Running)
                | (WorkflowState::Planning, WorkflowState::Failed)
                | (WorkflowState::Running, WorkflowState::Completed)
                | (WorkflowState::Running, WorkflowState::Failed)
        )
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowState::Validating => write!(f, "validating"),
            WorkflowState::Planning => write!(f, "planning"),
            WorkflowState::Running => write!(f, "running"),
            WorkflowState::Completed => write!(f, "completed"),
            WorkflowState::Failed => write!(f, "failed"),
        }
    }
}

/// A record of a state transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateHistoryEntry {
    pub state: WorkflowState,
    pub entered_at: DateTime<Utc>,
}

/// Tracks the current state of a run and every state it has visited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTracker {
    current: WorkflowState,
    history: Vec<StateHistoryEntry>,
}

impl StateTracker {
    /// Start a new tracker in the `validating` state.
    pub fn new() -> Self {
        Self {
            current: WorkflowState::Validating,
            history: vec![StateHistoryEntry {
                state: WorkflowState::Validating,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Attempt to move to `target`, returning the previous state.
    pub fn transition(&mut self, target: WorkflowState) -> Result<WorkflowState> {
        if !self.current.can_transition(target) {
            return Err(Error::InvalidStateTransition {
                from: self.current.to_string(),
                to: target.to_string(),
            });
        }

        let previous = self.current;
        self.current = target;
        self.history.push(StateHistoryEntry {
            state: target,
            entered_at: Utc::now(),
        });
        Ok(previous)
    }

    pub fn current(&self) -> WorkflowState {
        self.current
    }

    pub fn history(&self) -> &[StateHistoryEntry] {
        &self.history
    }
}

impl Default for StateTracker {
    fn default() -> Self {
        Self::new()
    }
}
