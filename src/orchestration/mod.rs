//! Orchestration layer.
//!
//! The scheduler drives structured workflows, the distributor hands ad hoc
//! tasks to agents, and the provisioner fills the pool. All of them reach
//! agents only through the injected [`AgentPool`].

mod coordinator;
mod distributor;
mod events;
mod executor;
mod pool;
mod progress;
mod provision;
mod scheduler;

pub use coordinator::Coordinator;
pub use distributor::{DistributionStrategy, TaskDistributor};
pub use events::{EventSink, OrchestrationEvent};
pub use executor::{ExecutorConfig, RunControl, StepExecutor, StepRun};
pub use pool::{AgentFactory, AgentHandle, AgentPool, LoadGuard, LocalAgentPool};
pub use progress::{AgentUtilization, ProgressReport, Statistics, StatsCounters, WorkflowProgress};
pub use provision::{ProvisionFailure, Provisioner};
pub use scheduler::Scheduler;
