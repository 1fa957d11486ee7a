//! Workflow definitions, run state, results, and validation.

pub mod result;
pub mod state;
pub mod types;
pub mod validate;

pub use result::{aggregate_output, StepResult, WorkflowResult};
pub use state::{StateHistoryEntry, StateTracker, WorkflowState};
pub use types::{RetryPolicy, WorkflowDefinition, WorkflowStep};
pub use validate::validate;
