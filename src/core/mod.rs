//! Core domain models for orchestration.
//!
//! This module contains the step dependency graph used to plan workflow
//! execution and the delegated task model used by the distributor.

pub mod dag;
pub mod task;

pub use dag::{build_execution_plan, DependencyGraph, ExecutionPlan};
pub use task::{
    AgentRequirement, AssignmentStatus, DelegateTask, TaskAssignment, TaskId, TaskPriority,
};
