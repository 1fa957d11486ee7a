//! Structural validation of workflow definitions.
//!
//! Runs before any planning or execution. The first failing check wins.

use std::collections::HashSet;

use crate::core::dag::DependencyGraph;
use crate::error::{Error, Result};
use crate::workflow::WorkflowDefinition;

/// Check a workflow definition for structural problems.
///
/// Checks, in order: non-empty id, non-empty name, at least one step,
/// unique step ids, dependency references to declared steps, and finally
/// the absence of cycles.
pub fn validate(workflow: &WorkflowDefinition) -> Result<()> {
    if workflow.id.trim().is_empty() {
        return Err(Error::Structural("workflow id is required".to_string()));
    }
    if workflow.name.trim().is_empty() {
        return Err(Error::Structural("workflow name is required".to_string()));
    }
    if workflow.steps.is_empty() {
        return Err(Error::Structural(
            "workflow must declare at least one step".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) {
            return Err(Error::Structural(format!("duplicate step id {}", step.id)));
        }
    }

    for (step, prerequisites) in &workflow.dependencies {
        if !seen.contains(step.as_str()) {
            return Err(Error::Structural(format!("references unknown step {}", step)));
        }
        if let Some(missing) = prerequisites.iter().find(|p| !seen.contains(p.as_str())) {
            return Err(Error::Structural(format!(
                "references unknown step {}",
                missing
            )));
        }
    }

    let graph = DependencyGraph::from_steps(&workflow.steps, &workflow.dependencies)?;
    if let Some(step) = graph.find_cycle() {
        return Err(Error::CircularDependency { step });
    }

    Ok(())
}
