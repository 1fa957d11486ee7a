//! Weave: workflow orchestration and task distribution over an agent pool.
//!
//! Workflows are validated, planned into dependency batches, and run step by
//! step against agents acquired from an [`orchestration::AgentPool`]. Ad hoc
//! tasks can be distributed over the same pool with round-robin,
//! capability-match, or load-balanced selection.

pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod workflow;

pub use agent::{Agent, AgentConfig, AgentId, AgentTask, FnAgent, StepContext};
pub use config::Config;
pub use error::{Error, Result};
pub use orchestration::{Coordinator, DistributionStrategy, LocalAgentPool};
pub use workflow::{WorkflowDefinition, WorkflowResult, WorkflowStep};
