//! Progress reports and cumulative statistics.
//!
//! `ProgressReport` is rebuilt from live workflow and assignment state on
//! every call. `Statistics` is a snapshot of monotonic counters that survive
//! clearing results and assignments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::agent::AgentId;
use crate::core::task::{AssignmentStatus, TaskAssignment};
use crate::orchestration::pool::AgentHandle;
use crate::workflow::WorkflowState;

/// Progress of one in-flight workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgress {
    pub workflow_id: String,
    pub state: WorkflowState,
    pub total_steps: usize,
    pub finished_steps: usize,
}

/// Current utilisation of one pool agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUtilization {
    pub agent_id: AgentId,
    pub agent_type: String,
    /// Executions in flight on the agent right now.
    pub active_executions: usize,
    /// Pending or running distributed tasks assigned to the agent.
    pub assigned_tasks: usize,
}

/// Live view of the engine at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressReport {
    pub active_workflows: usize,
    pub workflows: Vec<WorkflowProgress>,
    pub pending_tasks: usize,
    pub running_tasks: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub agents: Vec<AgentUtilization>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressReport {
    /// Build a report by scanning the given live state.
    pub fn collect(
        workflows: Vec<WorkflowProgress>,
        assignments: &[TaskAssignment],
        agents: &[AgentHandle],
    ) -> Self {
        let mut report = Self {
            active_workflows: workflows.len(),
            workflows,
            pending_tasks: 0,
            running_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            agents: Vec::with_capacity(agents.len()),
            timestamp: Utc::now(),
        };

        for assignment in assignments {
            match assignment.status {
                AssignmentStatus::Pending => report.pending_tasks += 1,
                AssignmentStatus::Running => report.running_tasks += 1,
                AssignmentStatus::Completed => report.completed_tasks += 1,
                AssignmentStatus::Failed { .. } => report.failed_tasks += 1,
            }
        }

        for handle in agents {
            let assigned_tasks = assignments
                .iter()
                .filter(|a| a.agent_id == handle.id() && a.status.is_active())
                .count();
            report.agents.push(AgentUtilization {
                agent_id: handle.id(),
                agent_type: handle.agent_type().to_string(),
                active_executions: handle.load(),
                assigned_tasks,
            });
        }

        report
    }

    pub fn total_tasks(&self) -> usize {
        self.pending_tasks + self.running_tasks + self.completed_tasks + self.failed_tasks
    }
}

/// Snapshot of cumulative counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub workflows_started: u64,
    pub workflows_completed: u64,
    pub workflows_failed: u64,
    pub steps_executed: u64,
    pub steps_succeeded: u64,
    pub steps_failed: u64,
    pub step_retries: u64,
    pub tasks_queued: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub agents_spawned: u64,
    pub spawn_failures: u64,
}

/// Shared monotonic counters behind [`Statistics`].
#[derive(Debug, Default)]
pub struct StatsCounters {
    workflows_started: AtomicU64,
    workflows_completed: AtomicU64,
    workflows_failed: AtomicU64,
    steps_executed: AtomicU64,
    steps_succeeded: AtomicU64,
    steps_failed: AtomicU64,
    step_retries: AtomicU64,
    tasks_queued: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    agents_spawned: AtomicU64,
    spawn_failures: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn workflow_started(&self) {
        bump(&self.workflows_started, 1);
    }

    pub fn workflow_finished(&self, success: bool) {
        if success {
            bump(&self.workflows_completed, 1);
        } else {
            bump(&self.workflows_failed, 1);
        }
    }

    pub fn step_finished(&self, success: bool) {
        bump(&self.steps_executed, 1);
        if success {
            bump(&self.steps_succeeded, 1);
        } else {
            bump(&self.steps_failed, 1);
        }
    }

    pub fn step_retried(&self) {
        bump(&self.step_retries, 1);
    }

    pub fn tasks_queued(&self, count: usize) {
        bump(&self.tasks_queued, count as u64);
    }

    pub fn task_finished(&self, success: bool) {
        if success {
            bump(&self.tasks_completed, 1);
        } else {
            bump(&self.tasks_failed, 1);
        }
    }

    pub fn agent_spawned(&self) {
        bump(&self.agents_spawned, 1);
    }

    pub fn spawn_failed(&self) {
        bump(&self.spawn_failures, 1);
    }

    pub fn snapshot(&self) -> Statistics {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        Statistics {
            workflows_started: read(&self.workflows_started),
            workflows_completed: read(&self.workflows_completed),
            workflows_failed: read(&self.workflows_failed),
            steps_executed: read(&self.steps_executed),
            steps_succeeded: read(&self.steps_succeeded),
            steps_failed: read(&self.steps_failed),
            step_retries: read(&self.step_retries),
            tasks_queued: read(&self.tasks_queued),
            tasks_completed: read(&self.tasks_completed),
            tasks_failed: read(&self.tasks_failed),
            agents_spawned: read(&self.agents_spawned),
            spawn_failures: read(&self.spawn_failures),
        }
    }
}
