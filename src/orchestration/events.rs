//! Lifecycle events emitted by the orchestration core.
//!
//! Events let observers react to workflow and task progress without polling.
//! Delivery is best-effort: events are dropped when the channel is full or
//! closed, and emitting never waits.

use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

use crate::agent::AgentId;
use crate::core::task::TaskId;
use crate::workflow::WorkflowState;

#[derive(Debug, Clone, PartialEq)]
pub enum OrchestrationEvent {
    WorkflowStarted {
        workflow_id: String,
    },
    StateChanged {
        workflow_id: String,
        from: WorkflowState,
        to: WorkflowState,
    },
    BatchStarted {
        workflow_id: String,
        index: usize,
        steps: Vec<String>,
    },
    StepStarted {
        workflow_id: String,
        step_id: String,
        agent_id: AgentId,
    },
    StepRetrying {
        workflow_id: String,
        step_id: String,
        attempt: u32,
        delay: Duration,
    },
    StepCompleted {
        workflow_id: String,
        step_id: String,
        attempts: u32,
    },
    StepFailed {
        workflow_id: String,
        step_id: String,
        error: String,
    },
    WorkflowFinished {
        workflow_id: String,
        success: bool,
    },
    TaskAssigned {
        task_id: TaskId,
        agent_id: AgentId,
    },
    TaskFinished {
        task_id: TaskId,
        success: bool,
    },
    AgentSpawned {
        agent_id: AgentId,
        agent_type: String,
    },
    SpawnFailed {
        agent_type: String,
        error: String,
    },
}

/// Optional sender shared by the components that emit events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<OrchestrationEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<OrchestrationEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: OrchestrationEvent) {
        if let Some(tx) = &self.tx {
            if let Err(err) = tx.try_send(event) {
                trace!("event dropped: {}", err);
            }
        }
    }
}
