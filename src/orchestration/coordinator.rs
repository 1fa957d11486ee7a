//! Entry point tying the scheduler, distributor, and provisioner together.
//!
//! A `Coordinator` is built around one injected [`AgentPool`] and shares a
//! single statistics registry and event sink across its components.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use crate::agent::AgentId;
use crate::config::Config;
use crate::core::task::{AgentRequirement, DelegateTask, TaskAssignment, TaskId};
use crate::error::Result;
use crate::orchestration::distributor::{DistributionStrategy, TaskDistributor};
use crate::orchestration::events::{EventSink, OrchestrationEvent};
use crate::orchestration::executor::ExecutorConfig;
use crate::orchestration::pool::AgentPool;
use crate::orchestration::progress::{ProgressReport, Statistics, StatsCounters};
use crate::orchestration::provision::{ProvisionFailure, Provisioner};
use crate::orchestration::scheduler::Scheduler;
use crate::workflow::{WorkflowDefinition, WorkflowResult, WorkflowState};

/// Orchestrates workflows and distributes tasks over one agent pool.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use weave::agent::{Agent, AgentTask, FnAgent};
/// use weave::orchestration::{Coordinator, LocalAgentPool};
/// use weave::workflow::{WorkflowDefinition, WorkflowStep};
/// use weave::Config;
///
/// # tokio_test::block_on(async {
/// let pool = LocalAgentPool::new();
/// let agent: Arc<dyn Agent> =
///     Arc::new(FnAgent::new("echo", |t: AgentTask| async move { Ok(t.input) }));
/// pool.insert(agent).await.unwrap();
///
/// let coordinator = Coordinator::new(Arc::new(pool), Config::default());
/// let workflow = WorkflowDefinition::new("hello", "Hello")
///     .step(WorkflowStep::new("greet", "echo", "say hello"));
///
/// let result = coordinator.orchestrate_workflow(&workflow).await;
/// assert!(result.success);
/// # });
/// ```
pub struct Coordinator {
    config: Config,
    pool: Arc<dyn AgentPool>,
    scheduler: Scheduler,
    distributor: TaskDistributor,
    provisioner: Provisioner,
    stats: Arc<StatsCounters>,
}

impl Coordinator {
    pub fn new(pool: Arc<dyn AgentPool>, config: Config) -> Self {
        Self::build(pool, config, EventSink::disabled())
    }

    /// Create a coordinator that reports lifecycle events on the returned
    /// channel. The channel holds `config.event_buffer` events.
    pub fn with_events(
        pool: Arc<dyn AgentPool>,
        config: Config,
    ) -> (Self, mpsc::Receiver<OrchestrationEvent>) {
        let (tx, rx) = mpsc::channel(config.event_buffer.max(1));
        (Self::build(pool, config, EventSink::new(tx)), rx)
    }

    fn build(pool: Arc<dyn AgentPool>, config: Config, events: EventSink) -> Self {
        debug!(
            strategy = %config.default_strategy,
            auto_spawn = config.auto_spawn,
            events = events.is_enabled(),
            "Coordinator::new"
        );
        let stats = Arc::new(StatsCounters::new());
        Self {
            scheduler: Scheduler::new(
                Arc::clone(&pool),
                ExecutorConfig::from(&config),
                Arc::clone(&stats),
                events.clone(),
            ),
            distributor: TaskDistributor::new(
                Arc::clone(&pool),
                Arc::clone(&stats),
                events.clone(),
            ),
            provisioner: Provisioner::new(Arc::clone(&pool), Arc::clone(&stats), events),
            pool,
            config,
            stats,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<dyn AgentPool> {
        &self.pool
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn distributor(&self) -> &TaskDistributor {
        &self.distributor
    }

    // Workflows

    pub async fn orchestrate_workflow(&self, workflow: &WorkflowDefinition) -> WorkflowResult {
        self.scheduler.orchestrate_workflow(workflow).await
    }

    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        self.scheduler.cancel_workflow(workflow_id).await
    }

    pub async fn workflow_result(&self, workflow_id: &str) -> Option<WorkflowResult> {
        self.scheduler.workflow_result(workflow_id).await
    }

    pub async fn workflow_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.scheduler.workflow_state(workflow_id).await
    }

    pub async fn results(&self) -> Vec<WorkflowResult> {
        self.scheduler.results().await
    }

    pub async fn clear_result(&self, workflow_id: &str) -> Result<WorkflowResult> {
        self.scheduler.clear_result(workflow_id).await
    }

    pub async fn clear_results(&self) {
        self.scheduler.clear_results().await
    }

    // Tasks

    /// Distribute tasks with `strategy`, or the configured default.
    pub async fn distribute_tasks(
        &self,
        tasks: Vec<DelegateTask>,
        strategy: Option<DistributionStrategy>,
    ) -> Vec<TaskAssignment> {
        let strategy = strategy.unwrap_or(self.config.default_strategy);
        self.distributor.distribute_tasks(tasks, strategy).await
    }

    pub async fn assignments(&self) -> Vec<TaskAssignment> {
        self.distributor.assignments().await
    }

    pub async fn assignment(&self, task_id: TaskId) -> Option<TaskAssignment> {
        self.distributor.assignment(task_id).await
    }

    pub async fn clear_assignments(&self) {
        self.distributor.clear_assignments().await
    }

    pub async fn clear_finished_assignments(&self) -> usize {
        self.distributor.clear_finished_assignments().await
    }

    // Agents

    pub async fn spawn_agents(&self, requirements: &[AgentRequirement]) -> Vec<AgentId> {
        self.provisioner.spawn_agents(requirements).await
    }

    pub async fn provision_failures(&self) -> Vec<ProvisionFailure> {
        self.provisioner.failures().await
    }

    pub async fn clear_provision_failures(&self) {
        self.provisioner.clear_failures().await;
    }

    // Reporting

    /// Scan live workflow, assignment, and agent state.
    pub async fn get_progress_report(&self) -> ProgressReport {
        let workflows = self.scheduler.active_progress().await;
        let assignments = self.distributor.assignments().await;
        let agents = self.pool.list_all().await;
        ProgressReport::collect(workflows, &assignments, &agents)
    }

    pub fn get_statistics(&self) -> Statistics {
        self.stats.snapshot()
    }
}
