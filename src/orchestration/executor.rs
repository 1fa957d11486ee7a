//! Step execution with timeouts, retries, and backoff.
//!
//! The `StepExecutor` runs a single workflow step against an agent acquired
//! from the pool. Each attempt is bounded by the step timeout and by the
//! run's [`RunControl`], which carries the workflow deadline and a
//! cancellation token. Suspension only happens while waiting on the agent
//! and while sleeping between attempts.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, AgentTask, StepContext};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::orchestration::events::{EventSink, OrchestrationEvent};
use crate::orchestration::pool::{AgentHandle, AgentPool};
use crate::orchestration::progress::StatsCounters;
use crate::workflow::{RetryPolicy, StepResult, WorkflowStep};

/// Deadline and cancellation shared by every step of one workflow run.
#[derive(Debug, Clone)]
pub struct RunControl {
    workflow_id: String,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl RunControl {
    /// Start the clock for a run with an optional overall timeout.
    pub fn new(workflow_id: &str, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel,
        }
    }

    /// A run with no deadline and a private cancellation token.
    pub fn unbounded(workflow_id: &str) -> Self {
        Self::new(workflow_id, None, CancellationToken::new())
    }

    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The error that stops the run, if it has been cancelled or timed out.
    pub fn halted(&self) -> Option<Error> {
        if self.cancel.is_cancelled() {
            return Some(Error::Cancelled);
        }
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) if Instant::now() >= deadline => {
                Some(Error::WorkflowTimeout(timeout))
            }
            _ => None,
        }
    }

    /// Resolves once the run is cancelled or its deadline passes.
    pub async fn interrupted(&self) -> Error {
        match (self.deadline, self.timeout) {
            (Some(deadline), Some(timeout)) => tokio::select! {
                _ = self.cancel.cancelled() => Error::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Error::WorkflowTimeout(timeout),
            },
            _ => {
                self.cancel.cancelled().await;
                Error::Cancelled
            }
        }
    }
}

/// Defaults applied to steps that leave a setting unspecified.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub default_timeout: Option<Duration>,
    pub default_retry: Option<RetryPolicy>,
    pub auto_spawn: bool,
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_timeout: config.default_step_timeout(),
            default_retry: config.default_retry.clone(),
            auto_spawn: config.auto_spawn,
        }
    }
}

/// A recorded step result.
#[derive(Debug)]
pub struct StepRun {
    pub result: StepResult,
    /// `WorkflowTimeout` or `Cancelled` when the run was halted under this step.
    pub halt: Option<Error>,
}

/// Runs individual workflow steps against pool agents.
pub struct StepExecutor {
    pool: Arc<dyn AgentPool>,
    config: ExecutorConfig,
    stats: Arc<StatsCounters>,
    events: EventSink,
}

impl StepExecutor {
    pub fn new(
        pool: Arc<dyn AgentPool>,
        config: ExecutorConfig,
        stats: Arc<StatsCounters>,
        events: EventSink,
    ) -> Self {
        Self {
            pool,
            config,
            stats,
            events,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute one step and record its outcome.
    ///
    /// `context` holds the outputs of every step that completed earlier in
    /// the run. Agent acquisition failures are terminal; execution failures
    /// and step timeouts are retried per the step's policy.
    pub async fn execute_step(
        &self,
        step: &WorkflowStep,
        context: Arc<StepContext>,
        control: &RunControl,
    ) -> StepResult {
        self.run_step(step, context, control).await.result
    }

    /// Like [`execute_step`](Self::execute_step), but also hands back the
    /// run-level error when a workflow timeout or cancellation cut the step
    /// short.
    pub async fn run_step(
        &self,
        step: &WorkflowStep,
        context: Arc<StepContext>,
        control: &RunControl,
    ) -> StepRun {
        let started_at = Utc::now();

        if let Some(halt) = control.halted() {
            let result = StepResult::failed(&step.id, &halt, 0, None, started_at);
            return StepRun {
                result: self.record(result, control),
                halt: Some(halt),
            };
        }

        let Some(handle) = self.acquire(step).await else {
            let err = Error::AgentUnavailable(format!(
                "no agent of type {} for step {}",
                step.agent_type, step.id
            ));
            warn!(workflow_id = control.workflow_id(), step_id = %step.id, "{}", err);
            let result = StepResult::failed(&step.id, err, 0, None, started_at);
            return StepRun {
                result: self.record(result, control),
                halt: None,
            };
        };

        let agent_id = handle.id();
        debug!(
            workflow_id = control.workflow_id(),
            step_id = %step.id,
            agent_id = %agent_id,
            "step started"
        );
        self.events.emit(OrchestrationEvent::StepStarted {
            workflow_id: control.workflow_id().to_string(),
            step_id: step.id.clone(),
            agent_id,
        });

        let (outcome, attempts) = self.run_attempts(step, &handle, context, control).await;
        self.pool.release(&handle).await;

        let (result, halt) = match outcome {
            Ok(output) => (
                StepResult::succeeded(&step.id, output, attempts, Some(agent_id), started_at),
                None,
            ),
            Err(err) => (
                StepResult::failed(&step.id, &err, attempts, Some(agent_id), started_at),
                Some(err).filter(Error::halts_workflow),
            ),
        };
        StepRun {
            result: self.record(result, control),
            halt,
        }
    }

    async fn run_attempts(
        &self,
        step: &WorkflowStep,
        handle: &AgentHandle,
        context: Arc<StepContext>,
        control: &RunControl,
    ) -> (Result<Value>, u32) {
        let policy = step
            .retry
            .clone()
            .or_else(|| self.config.default_retry.clone());
        let max_attempts = policy.as_ref().map_or(1, RetryPolicy::attempts);
        let timeout = step.timeout().or(self.config.default_timeout);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let task = AgentTask {
                id: step.id.clone(),
                description: step.task.clone(),
                input: step.input.clone(),
                context: Arc::clone(&context),
            };

            let err = match self.attempt(handle, task, timeout, control).await {
                Ok(output) => return (Ok(output), attempts),
                Err(err) => err,
            };

            if err.halts_workflow() || !err.is_retryable() || attempts >= max_attempts {
                if attempts > 1 {
                    warn!(
                        workflow_id = control.workflow_id(),
                        step_id = %step.id,
                        attempts,
                        "step failed after retries: {}",
                        err
                    );
                }
                return (Err(err), attempts);
            }

            let delay = policy
                .as_ref()
                .map_or(Duration::ZERO, |p| p.delay_for(attempts));
            warn!(
                workflow_id = control.workflow_id(),
                step_id = %step.id,
                attempt = attempts,
                max_attempts,
                "step attempt failed: {}. Retrying in {:?}",
                err,
                delay
            );
            self.stats.step_retried();
            self.events.emit(OrchestrationEvent::StepRetrying {
                workflow_id: control.workflow_id().to_string(),
                step_id: step.id.clone(),
                attempt: attempts,
                delay,
            });

            if let Err(halt) = backoff(delay, control).await {
                return (Err(halt), attempts);
            }
        }
    }

    /// One bounded call into the agent.
    async fn attempt(
        &self,
        handle: &AgentHandle,
        task: AgentTask,
        timeout: Option<Duration>,
        control: &RunControl,
    ) -> Result<Value> {
        let call = async {
            let result = match timeout {
                Some(limit) => tokio::time::timeout(limit, self.pool.execute(handle, task))
                    .await
                    .map_err(|_| Error::Timeout(limit))?,
                None => self.pool.execute(handle, task).await,
            };
            result.map_err(into_attempt_error)
        };

        tokio::select! {
            biased;
            halt = control.interrupted() => Err(halt),
            result = call => result,
        }
    }

    async fn acquire(&self, step: &WorkflowStep) -> Option<AgentHandle> {
        if let Some(handle) = self
            .pool
            .acquire(&step.agent_type, &step.required_capabilities)
            .await
        {
            return Some(handle);
        }
        if !self.config.auto_spawn {
            return None;
        }

        let config = AgentConfig::with_capabilities(step.required_capabilities.clone());
        match self.pool.spawn(&step.agent_type, config).await {
            Ok(handle) => {
                info!(
                    agent_id = %handle.id(),
                    agent_type = %step.agent_type,
                    "spawned agent on demand"
                );
                self.stats.agent_spawned();
                self.events.emit(OrchestrationEvent::AgentSpawned {
                    agent_id: handle.id(),
                    agent_type: step.agent_type.clone(),
                });
                Some(handle)
            }
            Err(err) => {
                debug!(agent_type = %step.agent_type, "on-demand spawn failed: {}", err);
                None
            }
        }
    }

    fn record(&self, result: StepResult, control: &RunControl) -> StepResult {
        self.stats.step_finished(result.success);
        let workflow_id = control.workflow_id().to_string();
        let event = if result.success {
            debug!(
                workflow_id = %workflow_id,
                step_id = %result.step_id,
                attempts = result.attempts,
                "step completed"
            );
            OrchestrationEvent::StepCompleted {
                workflow_id,
                step_id: result.step_id.clone(),
                attempts: result.attempts,
            }
        } else {
            OrchestrationEvent::StepFailed {
                workflow_id,
                step_id: result.step_id.clone(),
                error: result.error.clone().unwrap_or_default(),
            }
        };
        self.events.emit(event);
        result
    }
}

/// Sleep between attempts unless the run is interrupted first.
async fn backoff(delay: Duration, control: &RunControl) -> Result<()> {
    if delay.is_zero() {
        return match control.halted() {
            Some(halt) => Err(halt),
            None => Ok(()),
        };
    }
    tokio::select! {
        biased;
        halt = control.interrupted() => Err(halt),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Agent errors other than timeouts and unavailability count as execution
/// failures so they follow the retry policy.
fn into_attempt_error(err: Error) -> Error {
    match err {
        Error::TaskExecution(_)
        | Error::Timeout(_)
        | Error::AgentUnavailable(_)
        | Error::Cancelled
        | Error::WorkflowTimeout(_) => err,
        other => Error::TaskExecution(other.to_string()),
    }
}
