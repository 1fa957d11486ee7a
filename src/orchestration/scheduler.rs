//! Workflow driver.
//!
//! The `Scheduler` takes a workflow through `validating -> planning ->
//! running` and into `completed` or `failed`. Batches run one after another
//! and the steps inside a batch run concurrently through the
//! [`StepExecutor`]. A batch is a barrier: the next batch starts only after
//! every step of the current one has a recorded result.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::StepContext;
use crate::core::dag::{build_execution_plan, ExecutionPlan};
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, OrchestrationEvent};
use crate::orchestration::executor::{ExecutorConfig, RunControl, StepExecutor, StepRun};
use crate::orchestration::pool::AgentPool;
use crate::orchestration::progress::{StatsCounters, WorkflowProgress};
use crate::workflow::{
    aggregate_output, validate, StateTracker, StepResult, WorkflowDefinition, WorkflowResult,
    WorkflowState,
};

/// Bookkeeping for a workflow that has not finished yet.
struct ActiveWorkflow {
    tracker: StateTracker,
    cancel: CancellationToken,
    total_steps: usize,
    finished_steps: usize,
}

/// How the running phase ended.
struct RunOutcome {
    step_results: HashMap<String, StepResult>,
    /// Set when the run was cancelled or hit its deadline.
    halt: Option<Error>,
    /// First required step that failed.
    failed_step: Option<String>,
}

impl RunOutcome {
    fn success(&self) -> bool {
        self.halt.is_none() && self.failed_step.is_none()
    }

    fn error_summary(&self) -> Option<String> {
        if let Some(halt) = &self.halt {
            return Some(halt.to_string());
        }
        self.failed_step.as_ref().map(|id| {
            let cause = self
                .step_results
                .get(id)
                .and_then(|r| r.error.clone())
                .unwrap_or_default();
            format!("Step {} failed: {}", id, cause)
        })
    }
}

/// Drives workflow runs and owns their results.
pub struct Scheduler {
    executor: StepExecutor,
    results: RwLock<HashMap<String, WorkflowResult>>,
    active: RwLock<HashMap<String, ActiveWorkflow>>,
    stats: Arc<StatsCounters>,
    events: EventSink,
}

impl Scheduler {
    pub fn new(
        pool: Arc<dyn AgentPool>,
        config: ExecutorConfig,
        stats: Arc<StatsCounters>,
        events: EventSink,
    ) -> Self {
        Self {
            executor: StepExecutor::new(pool, config, Arc::clone(&stats), events.clone()),
            results: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            stats,
            events,
        }
    }

    /// Run a workflow to completion and store its result.
    ///
    /// Structural problems and cycles are reported in `WorkflowResult::error`
    /// without running any step. A workflow whose id is already running is
    /// rejected and the running one is left untouched.
    pub async fn orchestrate_workflow(&self, workflow: &WorkflowDefinition) -> WorkflowResult {
        let started_at = Utc::now();
        let cancel = CancellationToken::new();

        {
            let mut active = self.active.write().await;
            if active.contains_key(&workflow.id) {
                let err = Error::WorkflowInProgress(workflow.id.clone());
                warn!(workflow_id = %workflow.id, "{}", err);
                return WorkflowResult::rejected(&workflow.id, err, started_at);
            }
            active.insert(
                workflow.id.clone(),
                ActiveWorkflow {
                    tracker: StateTracker::new(),
                    cancel: cancel.clone(),
                    total_steps: workflow.steps.len(),
                    finished_steps: 0,
                },
            );
        }

        info!(workflow_id = %workflow.id, steps = workflow.steps.len(), "workflow started");
        self.stats.workflow_started();
        self.events.emit(OrchestrationEvent::WorkflowStarted {
            workflow_id: workflow.id.clone(),
        });

        let result = self.drive(workflow, cancel, started_at).await;

        self.results
            .write()
            .await
            .insert(workflow.id.clone(), result.clone());
        self.active.write().await.remove(&workflow.id);

        self.stats.workflow_finished(result.success);
        if result.success {
            info!(workflow_id = %workflow.id, "workflow completed");
        } else {
            warn!(
                workflow_id = %workflow.id,
                error = result.error.as_deref().unwrap_or(""),
                "workflow failed"
            );
        }
        self.events.emit(OrchestrationEvent::WorkflowFinished {
            workflow_id: workflow.id.clone(),
            success: result.success,
        });

        result
    }

    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        cancel: CancellationToken,
        started_at: DateTime<Utc>,
    ) -> WorkflowResult {
        if let Err(err) = validate(workflow) {
            return self.reject(&workflow.id, err, started_at).await;
        }

        self.transition(&workflow.id, WorkflowState::Planning).await;
        let plan = match build_execution_plan(&workflow.steps, &workflow.dependencies) {
            Ok(plan) if workflow.parallel => plan,
            Ok(plan) => plan.into_sequential(),
            Err(err) => return self.reject(&workflow.id, err, started_at).await,
        };
        debug!(
            workflow_id = %workflow.id,
            batches = plan.batch_count(),
            parallel = workflow.parallel,
            "execution plan ready"
        );

        self.transition(&workflow.id, WorkflowState::Running).await;
        let control = RunControl::new(&workflow.id, workflow.timeout(), cancel);
        let outcome = self.run_batches(workflow, &plan, &control).await;

        let state = if outcome.success() {
            WorkflowState::Completed
        } else {
            WorkflowState::Failed
        };
        self.transition(&workflow.id, state).await;

        WorkflowResult {
            workflow_id: workflow.id.clone(),
            success: outcome.success(),
            state,
            output: aggregate_output(&outcome.step_results),
            error: outcome.error_summary(),
            step_results: outcome.step_results,
            started_at,
            completed_at: Utc::now(),
        }
    }

    async fn run_batches(
        &self,
        workflow: &WorkflowDefinition,
        plan: &ExecutionPlan,
        control: &RunControl,
    ) -> RunOutcome {
        let mut context = StepContext::new();
        let mut outcome = RunOutcome {
            step_results: HashMap::new(),
            halt: None,
            failed_step: None,
        };

        for (index, batch) in plan.batches().iter().enumerate() {
            if let Some(halt) = control.halted() {
                outcome.halt = Some(halt);
                break;
            }

            debug!(workflow_id = %workflow.id, batch = index, steps = ?batch, "batch started");
            self.events.emit(OrchestrationEvent::BatchStarted {
                workflow_id: workflow.id.clone(),
                index,
                steps: batch.clone(),
            });

            let snapshot = Arc::new(context.clone());
            let runs = batch
                .iter()
                .filter_map(|id| workflow.get_step(id))
                .map(|step| {
                    let snapshot = Arc::clone(&snapshot);
                    async move {
                        let run = self.executor.run_step(step, snapshot, control).await;
                        self.mark_finished(&workflow.id).await;
                        (step.optional, run)
                    }
                });

            for (optional, StepRun { result, halt }) in join_all(runs).await {
                if outcome.halt.is_none() {
                    outcome.halt = halt;
                }
                if result.success {
                    if let Some(output) = &result.output {
                        context.insert(result.step_id.clone(), output.clone());
                    }
                } else if optional {
                    info!(
                        workflow_id = %workflow.id,
                        step_id = %result.step_id,
                        "optional step failed, continuing"
                    );
                } else if outcome.failed_step.is_none() {
                    outcome.failed_step = Some(result.step_id.clone());
                }
                outcome.step_results.insert(result.step_id.clone(), result);
            }

            // A halt counts even when it only interrupted optional steps
            if outcome.halt.is_some() {
                break;
            }
            if outcome.failed_step.is_some() {
                outcome.halt = control.halted();
                break;
            }
        }

        self.fill_unreached(workflow, &mut outcome);
        outcome
    }

    /// Give every step that never ran a failed result.
    fn fill_unreached(&self, workflow: &WorkflowDefinition, outcome: &mut RunOutcome) {
        let reason = match (&outcome.halt, &outcome.failed_step) {
            (Some(halt), _) => halt.to_string(),
            (None, Some(id)) => format!("skipped: upstream step {} failed", id),
            (None, None) => return,
        };
        for step in &workflow.steps {
            outcome
                .step_results
                .entry(step.id.clone())
                .or_insert_with(|| StepResult::not_run(&step.id, &reason));
        }
    }

    async fn reject(
        &self,
        workflow_id: &str,
        err: Error,
        started_at: DateTime<Utc>,
    ) -> WorkflowResult {
        warn!(workflow_id, "workflow rejected: {}", err);
        self.transition(workflow_id, WorkflowState::Failed).await;
        WorkflowResult::rejected(workflow_id, err, started_at)
    }

    async fn transition(&self, workflow_id: &str, target: WorkflowState) {
        let moved = {
            let mut active = self.active.write().await;
            match active.get_mut(workflow_id) {
                Some(entry) => entry.tracker.transition(target),
                None => return,
            }
        };
        match moved {
            Ok(from) => {
                debug!(workflow_id, %from, to = %target, "state changed");
                self.events.emit(OrchestrationEvent::StateChanged {
                    workflow_id: workflow_id.to_string(),
                    from,
                    to: target,
                });
            }
            Err(err) => warn!(workflow_id, "{}", err),
        }
    }

    async fn mark_finished(&self, workflow_id: &str) {
        if let Some(entry) = self.active.write().await.get_mut(workflow_id) {
            entry.finished_steps += 1;
        }
    }

    /// Cancel an in-flight workflow.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        let active = self.active.read().await;
        let entry = active
            .get(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))?;
        info!(workflow_id, "cancelling workflow");
        entry.cancel.cancel();
        Ok(())
    }

    pub async fn is_active(&self, workflow_id: &str) -> bool {
        self.active.read().await.contains_key(workflow_id)
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Progress of every in-flight workflow, ordered by id.
    pub async fn active_progress(&self) -> Vec<WorkflowProgress> {
        let active = self.active.read().await;
        let mut progress: Vec<WorkflowProgress> = active
            .iter()
            .map(|(id, entry)| WorkflowProgress {
                workflow_id: id.clone(),
                state: entry.tracker.current(),
                total_steps: entry.total_steps,
                finished_steps: entry.finished_steps,
            })
            .collect();
        progress.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        progress
    }

    pub async fn workflow_result(&self, workflow_id: &str) -> Option<WorkflowResult> {
        self.results.read().await.get(workflow_id).cloned()
    }

    /// Current state of a running workflow, or the final state of a stored one.
    pub async fn workflow_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        if let Some(entry) = self.active.read().await.get(workflow_id) {
            return Some(entry.tracker.current());
        }
        self.results
            .read()
            .await
            .get(workflow_id)
            .map(|r| r.state)
    }

    /// Every stored result, oldest first.
    pub async fn results(&self) -> Vec<WorkflowResult> {
        let mut results: Vec<WorkflowResult> =
            self.results.read().await.values().cloned().collect();
        results.sort_by_key(|r| r.started_at);
        results
    }

    pub async fn clear_result(&self, workflow_id: &str) -> Result<WorkflowResult> {
        self.results
            .write()
            .await
            .remove(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound(workflow_id.to_string()))
    }

    pub async fn clear_results(&self) {
        self.results.write().await.clear();
    }
}
