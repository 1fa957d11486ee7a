//! Ad hoc task distribution across the agent pool.
//!
//! `distribute_tasks` only selects agents and records assignments. Execution
//! of each assignment runs on a detached tokio task that moves it through
//! `pending -> running -> completed|failed`; callers observe that through
//! [`TaskDistributor::assignments`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::agent::{AgentId, AgentTask};
use crate::core::task::{DelegateTask, TaskAssignment, TaskId};
use crate::orchestration::events::{EventSink, OrchestrationEvent};
use crate::orchestration::pool::{AgentHandle, AgentPool};
use crate::orchestration::progress::StatsCounters;

/// Cursor key for tasks without a preferred agent type.
const ANY_TYPE: &str = "*";

/// Policy for choosing an agent for each delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStrategy {
    /// Cycle through agents of the preferred type in pool order.
    #[default]
    RoundRobin,
    /// First agent in pool order offering every required capability.
    CapabilityMatch,
    /// Agent of the preferred type with the fewest active assignments.
    LoadBalanced,
}

impl std::fmt::Display for DistributionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionStrategy::RoundRobin => write!(f, "round_robin"),
            DistributionStrategy::CapabilityMatch => write!(f, "capability_match"),
            DistributionStrategy::LoadBalanced => write!(f, "load_balanced"),
        }
    }
}

/// Assigns delegated tasks to agents and tracks the resulting assignments.
pub struct TaskDistributor {
    pool: Arc<dyn AgentPool>,
    assignments: Arc<RwLock<Vec<TaskAssignment>>>,
    /// Round-robin position per preferred type.
    cursors: Mutex<HashMap<String, usize>>,
    stats: Arc<StatsCounters>,
    events: EventSink,
}

impl TaskDistributor {
    pub fn new(pool: Arc<dyn AgentPool>, stats: Arc<StatsCounters>, events: EventSink) -> Self {
        Self {
            pool,
            assignments: Arc::new(RwLock::new(Vec::new())),
            cursors: Mutex::new(HashMap::new()),
            stats,
            events,
        }
    }

    /// Assign each task to an agent using `strategy`.
    ///
    /// Tasks are considered in descending priority, keeping submission order
    /// for equal priorities. Tasks with no matching agent are left out of the
    /// returned list. Returns without waiting for any task to run.
    pub async fn distribute_tasks(
        &self,
        mut tasks: Vec<DelegateTask>,
        strategy: DistributionStrategy,
    ) -> Vec<TaskAssignment> {
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority));
        let submitted = tasks.len();

        let selected = {
            // Serializes selection so concurrent calls see each other's cursors.
            let mut cursors = self.cursors.lock().await;
            let mut load = self.active_load().await;
            let mut selected = Vec::with_capacity(tasks.len());

            for task in tasks {
                let handle = match strategy {
                    DistributionStrategy::RoundRobin => self.round_robin(&task, &mut cursors).await,
                    DistributionStrategy::CapabilityMatch => self.capability_match(&task).await,
                    DistributionStrategy::LoadBalanced => self.least_assigned(&task, &load).await,
                };
                let Some(handle) = handle else {
                    debug!(task_id = %task.id, %strategy, "no agent matched task");
                    continue;
                };
                *load.entry(handle.id()).or_insert(0) += 1;
                selected.push((TaskAssignment::new(task, handle.id()), handle));
            }
            selected
        };

        let assignments: Vec<TaskAssignment> = selected.iter().map(|(a, _)| a.clone()).collect();
        self.assignments
            .write()
            .await
            .extend(assignments.iter().cloned());
        self.stats.tasks_queued(assignments.len());

        info!(
            submitted,
            assigned = assignments.len(),
            %strategy,
            "tasks distributed"
        );
        if assignments.len() < submitted {
            warn!(
                unmatched = submitted - assignments.len(),
                "some tasks had no matching agent"
            );
        }

        for (assignment, handle) in selected {
            self.events.emit(OrchestrationEvent::TaskAssigned {
                task_id: assignment.task_id(),
                agent_id: handle.id(),
            });
            self.dispatch(assignment, handle);
        }

        assignments
    }

    /// Count pending and running assignments per agent.
    async fn active_load(&self) -> HashMap<AgentId, usize> {
        let mut load = HashMap::new();
        for assignment in self.assignments.read().await.iter() {
            if assignment.status.is_active() {
                *load.entry(assignment.agent_id).or_insert(0) += 1;
            }
        }
        load
    }

    async fn candidates(&self, task: &DelegateTask) -> Vec<AgentHandle> {
        match &task.agent_type {
            Some(agent_type) => self.pool.list_by_type(agent_type).await,
            None => self.pool.list_all().await,
        }
    }

    async fn round_robin(
        &self,
        task: &DelegateTask,
        cursors: &mut HashMap<String, usize>,
    ) -> Option<AgentHandle> {
        let candidates = self.candidates(task).await;
        if candidates.is_empty() {
            return None;
        }
        let key = task.agent_type.as_deref().unwrap_or(ANY_TYPE);
        let cursor = cursors.entry(key.to_string()).or_insert(0);
        let handle = candidates[*cursor % candidates.len()].clone();
        *cursor = cursor.wrapping_add(1);
        Some(handle)
    }

    async fn capability_match(&self, task: &DelegateTask) -> Option<AgentHandle> {
        self.pool
            .list_all()
            .await
            .into_iter()
            .find(|h| h.has_capabilities(&task.required_capabilities))
    }

    async fn least_assigned(
        &self,
        task: &DelegateTask,
        load: &HashMap<AgentId, usize>,
    ) -> Option<AgentHandle> {
        let count = |h: &AgentHandle| load.get(&h.id()).copied().unwrap_or(0);
        let mut best: Option<AgentHandle> = None;
        for handle in self.candidates(task).await {
            if best.as_ref().map_or(true, |b| count(&handle) < count(b)) {
                best = Some(handle);
            }
        }
        best
    }

    /// Run an assignment in the background and record its progress.
    fn dispatch(&self, assignment: TaskAssignment, handle: AgentHandle) {
        let pool = Arc::clone(&self.pool);
        let table = Arc::clone(&self.assignments);
        let stats = Arc::clone(&self.stats);
        let events = self.events.clone();
        let task_id = assignment.task_id();

        tokio::spawn(async move {
            update(&table, task_id, TaskAssignment::start).await;

            let task = AgentTask::new(
                &task_id.to_string(),
                &assignment.task.description,
                assignment.task.input.clone(),
            );
            let outcome = pool.execute(&handle, task).await;
            pool.release(&handle).await;

            let success = outcome.is_ok();
            match outcome {
                Ok(output) => {
                    debug!(task_id = %task_id, agent_id = %handle.id(), "task completed");
                    update(&table, task_id, move |a| a.complete(output)).await;
                }
                Err(err) => {
                    warn!(task_id = %task_id, agent_id = %handle.id(), "task failed: {}", err);
                    let message = err.to_string();
                    update(&table, task_id, move |a| a.fail(&message)).await;
                }
            }

            stats.task_finished(success);
            events
                .emit(OrchestrationEvent::TaskFinished { task_id, success });
        });
    }

    /// Every assignment in creation order.
    pub async fn assignments(&self) -> Vec<TaskAssignment> {
        self.assignments.read().await.clone()
    }

    pub async fn assignment(&self, task_id: TaskId) -> Option<TaskAssignment> {
        self.assignments
            .read()
            .await
            .iter()
            .find(|a| a.task_id() == task_id)
            .cloned()
    }

    pub async fn clear_assignments(&self) {
        self.assignments.write().await.clear();
    }

    /// Drop completed and failed assignments, returning how many were removed.
    pub async fn clear_finished_assignments(&self) -> usize {
        let mut assignments = self.assignments.write().await;
        let before = assignments.len();
        assignments.retain(|a| !a.status.is_terminal());
        before - assignments.len()
    }
}

/// Apply `change` to the assignment for `task_id` if it is still tracked.
async fn update<F>(table: &RwLock<Vec<TaskAssignment>>, task_id: TaskId, change: F)
where
    F: FnOnce(&mut TaskAssignment),
{
    if let Some(assignment) = table
        .write()
        .await
        .iter_mut()
        .find(|a| a.task_id() == task_id)
    {
        change(assignment);
    }
}
