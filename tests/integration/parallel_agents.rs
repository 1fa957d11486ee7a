//! Batch concurrency and ordering tests.
//!
//! These tests verify that steps inside a batch run concurrently, that
//! batches are separated by a barrier, and that sequential workflows run as
//! a strict chain in declaration order. Time is paused so sleeps advance
//! deterministically.

use std::time::Duration;
use tokio::time::Instant;

use weave::workflow::{WorkflowDefinition, WorkflowStep};

use crate::fixtures::{
    chain_workflow, coordinator_with, diamond_workflow, ExecutionLog, ScriptedAgent,
};

/// Test: Diamond join waits for both branches
/// Given a diamond workflow in parallel mode
/// When it runs
/// Then d starts no earlier than the later of b and c finishing
#[tokio::test(start_paused = true)]
async fn test_diamond_join_waits_for_branches() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker")
        .with_delay(Duration::from_millis(50))
        .with_log(&log)
        .into_agent()])
    .await;

    let result = coordinator
        .orchestrate_workflow(&diamond_workflow("worker"))
        .await;

    assert!(result.success);
    let (b, c, d) = (log.span("b"), log.span("c"), log.span("d"));
    assert!(d.started >= b.finished.max(c.finished));

    // b and c share a batch and overlap in time
    assert!(b.started < c.finished && c.started < b.finished);

    let d_result = result.step("d").unwrap();
    let b_result = result.step("b").unwrap();
    let c_result = result.step("c").unwrap();
    assert!(d_result.started_at >= b_result.completed_at.max(c_result.completed_at));
}

/// Test: Sequential chain runs in declaration order
/// Given a -> b -> c with parallel disabled
/// When it runs
/// Then each step starts only after the previous one finished
#[tokio::test(start_paused = true)]
async fn test_sequential_chain_order() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker")
        .with_delay(Duration::from_millis(20))
        .with_log(&log)
        .into_agent()])
    .await;

    let result = coordinator
        .orchestrate_workflow(&chain_workflow("worker").sequential())
        .await;

    assert!(result.success);
    assert_eq!(log.start_order(), vec!["a", "b", "c"]);
    assert!(log.span("b").started >= log.span("a").finished);
    assert!(log.span("c").started >= log.span("b").finished);
}

/// Test: Sequential mode serializes independent steps
/// Given three independent steps and parallel disabled
/// When the workflow runs
/// Then they execute one at a time in declaration order
#[tokio::test(start_paused = true)]
async fn test_sequential_mode_serializes_independent_steps() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker")
        .with_delay(Duration::from_millis(10))
        .with_log(&log)
        .into_agent()])
    .await;
    let workflow = WorkflowDefinition::new("seq", "Sequential")
        .step(WorkflowStep::new("z", "worker", "z"))
        .step(WorkflowStep::new("x", "worker", "x"))
        .step(WorkflowStep::new("y", "worker", "y"))
        .sequential();

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success);
    assert_eq!(log.start_order(), vec!["z", "x", "y"]);
    assert!(log.span("x").started >= log.span("z").finished);
    assert!(log.span("y").started >= log.span("x").finished);
}

/// Test: The next batch waits for the slowest sibling
/// Given a fast and a slow step in one batch and a dependent of the fast one
/// When the workflow runs
/// Then the dependent starts only after the slow step finished
#[tokio::test(start_paused = true)]
async fn test_batch_barrier_waits_for_slowest() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("fast").with_log(&log).into_agent(),
        ScriptedAgent::new("slow")
            .with_delay(Duration::from_millis(300))
            .with_log(&log)
            .into_agent(),
    ])
    .await;
    let workflow = WorkflowDefinition::new("barrier", "Barrier")
        .step(WorkflowStep::new("quick", "fast", "quick"))
        .step(WorkflowStep::new("lazy", "slow", "lazy"))
        .step(WorkflowStep::new("after", "fast", "after"))
        .depends_on("after", &["quick"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success);
    assert!(log.span("after").started >= log.span("lazy").finished);
}

/// Test: Wide batches run concurrently
/// Given fifty independent steps that each take 100ms
/// When the workflow runs
/// Then the whole run takes about one step's duration
#[tokio::test(start_paused = true)]
async fn test_wide_batch_runs_concurrently() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![ScriptedAgent::new("worker")
        .with_delay(Duration::from_millis(100))
        .with_log(&log)
        .into_agent()])
    .await;
    let workflow = (0..50).fold(WorkflowDefinition::new("wide", "Wide"), |wf, i| {
        wf.step(WorkflowStep::new(&format!("s{}", i), "worker", "work"))
    });

    let started = Instant::now();
    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(result.success);
    assert_eq!(result.step_results.len(), 50);
    assert_eq!(log.len(), 50);
    assert!(started.elapsed() < Duration::from_secs(1));
}

/// Test: Siblings of a failed required step still finish
/// Given a failing step and a slow sibling in the same batch
/// When the workflow runs
/// Then the sibling completes successfully and the next batch never starts
#[tokio::test(start_paused = true)]
async fn test_siblings_finish_after_required_failure() {
    let log = ExecutionLog::new();
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("broken").always_failing().with_log(&log).into_agent(),
        ScriptedAgent::new("slow")
            .with_delay(Duration::from_millis(200))
            .with_log(&log)
            .into_agent(),
    ])
    .await;
    let workflow = WorkflowDefinition::new("siblings", "Siblings")
        .step(WorkflowStep::new("bad", "broken", "bad"))
        .step(WorkflowStep::new("good", "slow", "good"))
        .step(WorkflowStep::new("next", "slow", "next"))
        .depends_on("next", &["bad", "good"]);

    let result = coordinator.orchestrate_workflow(&workflow).await;

    assert!(!result.success);
    assert!(result.step("good").unwrap().success);
    assert!(log.span("good").success);
    assert!(!log.span("bad").success);
    assert_eq!(result.step("next").unwrap().attempts, 0);
    assert_eq!(log.len(), 2);
}
