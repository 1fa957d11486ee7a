//! End-to-end workflow tests.
//!
//! These tests submit complete workflow definitions to a coordinator and
//! check validation, planning, execution, and the stored results.

use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use weave::workflow::{WorkflowDefinition, WorkflowState, WorkflowStep};

use crate::fixtures::{
    chain_workflow, coordinator_with, diamond_workflow, wait_until_active, ScriptedAgent,
};

/// Test: Every declared step gets exactly one result
/// Given a valid acyclic workflow of five steps
/// When it is orchestrated
/// Then the result holds one entry per step and the run completes
#[tokio::test]
async fn test_one_result_per_declared_step() {
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker").into_agent()]).await;
    let workflow = WorkflowDefinition::new("five", "Five steps")
        .step(WorkflowStep::new("fetch", "worker", "fetch"))
        .step(WorkflowStep::new("parse", "worker", "parse"))
        .step(WorkflowStep::new("lint", "worker", "lint"))
        .step(WorkflowStep::new("build", "worker", "build"))
        .step(WorkflowStep::new("report", "worker", "report"))
        .depends_on("parse", &["fetch"])
        .depends_on("build", &["parse", "lint"])
        .depends_on("report", &["build"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success, "workflow failed: {:?}", result.error);
    assert_eq!(result.state, WorkflowState::Completed);
    assert_eq!(result.step_results.len(), 5);
    for step in &workflow.steps {
        let step_result = result.step(&step.id).unwrap();
        assert!(step_result.success);
        assert_eq!(step_result.attempts, 1);
    }
    assert!(result.error.is_none());
    assert!(result.completed_at >= result.started_at);
}

/// Test: A three-step cycle is rejected before execution
/// Given steps where a needs c, b needs a, and c needs b
/// When the workflow is orchestrated
/// Then validation reports a circular dependency and no agent is invoked
#[tokio::test]
async fn test_three_step_cycle_runs_nothing() {
    let agent = ScriptedAgent::new("worker");
    let calls = agent.calls();
    let coordinator = coordinator_with(vec![agent.into_agent()]).await;
    let workflow = WorkflowDefinition::new("cycle", "Cycle")
        .step(WorkflowStep::new("a", "worker", "a"))
        .step(WorkflowStep::new("b", "worker", "b"))
        .step(WorkflowStep::new("c", "worker", "c"))
        .depends_on("a", &["c"])
        .depends_on("b", &["a"])
        .depends_on("c", &["b"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(!result.success);
    assert_eq!(result.state, WorkflowState::Failed);
    assert!(result.step_results.is_empty());
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .starts_with("Circular dependency detected at step:"));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

/// Test: Structural errors are reported in order
/// Given malformed definitions
/// When they are orchestrated
/// Then each is rejected with a descriptive error and no step results
#[tokio::test]
async fn test_structural_errors() {
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker").into_agent()]).await;

    let cases = vec![
        (
            WorkflowDefinition::new("nameless", "").step(WorkflowStep::new("a", "worker", "a")),
            "name",
        ),
        (WorkflowDefinition::new("empty", "Empty"), "at least one step"),
        (
            WorkflowDefinition::new("dupe", "Dupe")
                .step(WorkflowStep::new("a", "worker", "a"))
                .step(WorkflowStep::new("a", "worker", "again")),
            "duplicate step id a",
        ),
        (
            WorkflowDefinition::new("dangling", "Dangling")
                .step(WorkflowStep::new("a", "worker", "a"))
                .depends_on("a", &["ghost"]),
            "references unknown step ghost",
        ),
    ];

    for (workflow, expected) in cases {
        let result = coordinator.orchestrate_workflow(&workflow).await;
        let error = result.error.unwrap_or_default();
        assert!(!result.success);
        assert!(result.step_results.is_empty());
        assert!(
            error.starts_with("Invalid workflow:") && error.contains(expected),
            "{}: unexpected error {:?}",
            workflow.id,
            error
        );
    }
}

/// Test: A failing optional step does not fail the workflow
/// Given one optional step that fails and two required steps that succeed
/// When the workflow is orchestrated
/// Then the workflow succeeds and only the optional result is marked failed
#[tokio::test]
async fn test_optional_failure_keeps_success() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("worker").into_agent(),
        ScriptedAgent::new("flaky").always_failing().into_agent(),
    ])
    .await;
    let workflow = WorkflowDefinition::new("optional", "Optional")
        .step(WorkflowStep::new("setup", "worker", "setup"))
        .step(WorkflowStep::new("lint", "flaky", "lint").optional())
        .step(WorkflowStep::new("build", "worker", "build"))
        .depends_on("lint", &["setup"])
        .depends_on("build", &["lint"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success);
    assert!(!result.step("lint").unwrap().success);
    assert!(result.step("setup").unwrap().success);

    // Descendants still run and the failed key is absent from their context
    let build = result.step("build").unwrap();
    assert!(build.success);
    assert_eq!(build.output.as_ref().unwrap()["seen"], json!(["setup"]));
    assert_eq!(result.output.as_object().unwrap().len(), 2);
}

/// Test: A failing required step fails the workflow
/// Given a required step that always fails
/// When the workflow is orchestrated
/// Then success is false, the error names the step, and later steps are not run
#[tokio::test]
async fn test_required_failure_fails_workflow() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("worker").into_agent(),
        ScriptedAgent::new("broken").always_failing().into_agent(),
    ])
    .await;
    let workflow = WorkflowDefinition::new("required", "Required")
        .step(WorkflowStep::new("a", "worker", "a"))
        .step(WorkflowStep::new("b", "broken", "b"))
        .step(WorkflowStep::new("c", "worker", "c"))
        .depends_on("b", &["a"])
        .depends_on("c", &["b"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(!result.success);
    assert_eq!(result.state, WorkflowState::Failed);
    let error = result.error.clone().unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("Step b failed"));

    assert_eq!(result.step_results.len(), 3);
    let c = result.step("c").unwrap();
    assert!(!c.success);
    assert_eq!(c.attempts, 0);
}

/// Test: Steps see every earlier output, not only their prerequisites
/// Given a and b in the first batch and c depending only on a
/// When the workflow is orchestrated
/// Then c's context holds both a and b
#[tokio::test]
async fn test_context_is_full_accumulated_map() {
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker").into_agent()]).await;
    let workflow = WorkflowDefinition::new("context", "Context")
        .step(WorkflowStep::new("a", "worker", "a"))
        .step(WorkflowStep::new("b", "worker", "b"))
        .step(WorkflowStep::new("c", "worker", "c"))
        .depends_on("c", &["a"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success);
    let c = result.step("c").unwrap().output.clone().unwrap();
    assert_eq!(c["seen"], json!(["a", "b"]));
    assert_eq!(result.output["a"]["step"], json!("a"));
}

/// Test: Results are queryable until cleared
/// Given two orchestrated workflows
/// When results are queried and cleared
/// Then state and results reflect the table contents
#[tokio::test]
async fn test_results_table_lifecycle() {
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker").into_agent()]).await;

    coordinator.orchestrate_workflow(&diamond_workflow("worker")).await;
    coordinator.orchestrate_workflow(&chain_workflow("worker")).await;

    assert_eq!(coordinator.results().await.len(), 2);
    assert_eq!(
        coordinator.workflow_state("diamond").await,
        Some(WorkflowState::Completed)
    );

    let removed = coordinator.clear_result("diamond").await.unwrap();
    assert_eq!(removed.workflow_id, "diamond");
    assert!(coordinator.workflow_result("diamond").await.is_none());
    assert!(coordinator.workflow_state("diamond").await.is_none());

    coordinator.clear_results().await;
    assert!(coordinator.results().await.is_empty());
}

/// Test: A workflow id cannot run twice at once
/// Given a slow workflow in flight
/// When the same id is submitted again
/// Then the second submission is rejected and the first still completes
#[tokio::test]
async fn test_duplicate_in_flight_workflow_rejected() {
    let coordinator = Arc::new(
        coordinator_with(vec![ScriptedAgent::new("slow")
            .with_delay(Duration::from_millis(150))
            .into_agent()])
        .await,
    );
    let workflow =
        WorkflowDefinition::new("busy", "Busy").step(WorkflowStep::new("a", "slow", "wait"));

    let first = {
        let coordinator = Arc::clone(&coordinator);
        let workflow = workflow.clone();
        tokio::spawn(async move { coordinator.orchestrate_workflow(&workflow).await })
    };
    assert!(wait_until_active(&coordinator, "busy", Duration::from_secs(1)).await);

    let second = coordinator.orchestrate_workflow(&workflow).await;
    assert!(!second.success);
    assert!(second.error.unwrap().contains("already in progress"));

    let first = first.await.unwrap();
    assert!(first.success);
    assert!(coordinator.workflow_result("busy").await.unwrap().success);
}
