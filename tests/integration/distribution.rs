//! Task distribution and provisioning tests.
//!
//! These tests verify the three selection strategies, assignment tracking,
//! and requirement-by-requirement agent provisioning.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use weave::agent::AgentId;
use weave::core::task::{AgentRequirement, AssignmentStatus, DelegateTask, TaskPriority};
use weave::orchestration::{AgentPool, LocalAgentPool};
use weave::{Config, Coordinator, DistributionStrategy};

use crate::fixtures::{
    coordinator_with, count_status, pool_with, register_scripted, wait_for_assignments,
    ScriptedAgent,
};

fn typed_tasks(n: usize, agent_type: &str) -> Vec<DelegateTask> {
    (0..n)
        .map(|i| DelegateTask::new(&format!("task {}", i)).for_type(agent_type))
        .collect()
}

async fn agent_ids(coordinator: &Coordinator) -> Vec<AgentId> {
    coordinator
        .pool()
        .list_all()
        .await
        .iter()
        .map(|h| h.id())
        .collect()
}

fn per_agent(assignments: &[weave::core::task::TaskAssignment]) -> HashMap<AgentId, usize> {
    let mut counts = HashMap::new();
    for assignment in assignments {
        *counts.entry(assignment.agent_id).or_insert(0) += 1;
    }
    counts
}

/// Test: Round-robin cycles through agents
/// Given three agents of one type
/// When six tasks are distributed round-robin
/// Then each agent gets two tasks in cyclical order
#[tokio::test]
async fn test_round_robin_six_tasks_three_agents() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("coder").into_agent(),
    ])
    .await;
    let ids = agent_ids(&coordinator).await;

    let assignments = coordinator
        .distribute_tasks(typed_tasks(6, "coder"), Some(DistributionStrategy::RoundRobin))
        .await;

    assert_eq!(assignments.len(), 6);
    let picked: Vec<AgentId> = assignments.iter().map(|a| a.agent_id).collect();
    assert_eq!(picked, vec![ids[0], ids[1], ids[2], ids[0], ids[1], ids[2]]);
    assert!(per_agent(&assignments).values().all(|&n| n == 2));
}

/// Test: Round-robin ignores current load
/// Given two agents where the first is busy with an earlier task
/// When more tasks are distributed round-robin
/// Then the cursor continues regardless of load
#[tokio::test]
async fn test_round_robin_ignores_load() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder")
            .with_delay(Duration::from_millis(200))
            .into_agent(),
        ScriptedAgent::new("coder").into_agent(),
    ])
    .await;
    let ids = agent_ids(&coordinator).await;

    let first = coordinator
        .distribute_tasks(typed_tasks(1, "coder"), Some(DistributionStrategy::RoundRobin))
        .await;
    let rest = coordinator
        .distribute_tasks(typed_tasks(3, "coder"), Some(DistributionStrategy::RoundRobin))
        .await;

    assert_eq!(first[0].agent_id, ids[0]);
    let picked: Vec<AgentId> = rest.iter().map(|a| a.agent_id).collect();
    assert_eq!(picked, vec![ids[1], ids[0], ids[1]]);
}

/// Test: Capability-match omits unsatisfiable tasks
/// Given agents offering rust and rust+sql
/// When tasks need sql, python, and nothing
/// Then the python task is omitted and the others go to the first match
#[tokio::test]
async fn test_capability_match_omits_unmatched() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder").with_capabilities(&["rust"]).into_agent(),
        ScriptedAgent::new("analyst")
            .with_capabilities(&["rust", "sql"])
            .into_agent(),
    ])
    .await;
    let ids = agent_ids(&coordinator).await;
    let tasks = vec![
        DelegateTask::new("report").requiring(["sql"]),
        DelegateTask::new("train").requiring(["python"]),
        DelegateTask::new("anything"),
    ];
    let submitted = tasks.len();

    let assignments = coordinator
        .distribute_tasks(tasks, Some(DistributionStrategy::CapabilityMatch))
        .await;

    assert!(assignments.len() < submitted);
    assert_eq!(assignments.len(), 2);
    assert_eq!(assignments[0].task.description, "report");
    assert_eq!(assignments[0].agent_id, ids[1]);
    assert_eq!(assignments[1].task.description, "anything");
    assert_eq!(assignments[1].agent_id, ids[0]);
}

/// Test: Load-balanced splits evenly
/// Given two equally capable agents
/// When four tasks are distributed load-balanced
/// Then each agent gets two
#[tokio::test]
async fn test_load_balanced_two_two_split() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("coder").into_agent(),
    ])
    .await;

    let assignments = coordinator
        .distribute_tasks(typed_tasks(4, "coder"), Some(DistributionStrategy::LoadBalanced))
        .await;

    let counts = per_agent(&assignments);
    assert_eq!(counts.len(), 2);
    assert!(counts.values().all(|&n| n == 2));
}

/// Test: Load-balanced spread differs by at most one
/// Given three agents
/// When seven tasks are distributed load-balanced
/// Then max and min per-agent counts differ by at most one
#[tokio::test]
async fn test_load_balanced_spread_within_one() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("coder").into_agent(),
    ])
    .await;

    let assignments = coordinator
        .distribute_tasks(typed_tasks(7, "coder"), Some(DistributionStrategy::LoadBalanced))
        .await;

    let counts = per_agent(&assignments);
    let max = counts.values().max().copied().unwrap();
    let min = counts.values().min().copied().unwrap();
    assert_eq!(counts.len(), 3);
    assert!(max - min <= 1);
}

/// Test: Load-balanced counts assignments still in flight
/// Given the first agent busy with a slow earlier task
/// When one more task is distributed load-balanced
/// Then it goes to the idle second agent
#[tokio::test]
async fn test_load_balanced_accounts_for_active_assignments() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder")
            .with_delay(Duration::from_millis(300))
            .into_agent(),
        ScriptedAgent::new("coder")
            .with_delay(Duration::from_millis(300))
            .into_agent(),
    ])
    .await;
    let ids = agent_ids(&coordinator).await;

    let first = coordinator
        .distribute_tasks(typed_tasks(1, "coder"), Some(DistributionStrategy::LoadBalanced))
        .await;
    let second = coordinator
        .distribute_tasks(typed_tasks(1, "coder"), Some(DistributionStrategy::LoadBalanced))
        .await;

    assert_eq!(first[0].agent_id, ids[0]);
    assert_eq!(second[0].agent_id, ids[1]);
}

/// Test: Higher priority tasks are assigned first
/// Given tasks of mixed priority
/// When they are distributed round-robin
/// Then assignments follow descending priority with submission order on ties
#[tokio::test]
async fn test_priority_order() {
    let coordinator = coordinator_with(vec![ScriptedAgent::new("coder").into_agent()]).await;
    let tasks = vec![
        DelegateTask::new("low").for_type("coder").with_priority(TaskPriority::Low),
        DelegateTask::new("normal-1").for_type("coder"),
        DelegateTask::new("critical")
            .for_type("coder")
            .with_priority(TaskPriority::Critical),
        DelegateTask::new("normal-2").for_type("coder"),
    ];

    let assignments = coordinator.distribute_tasks(tasks, None).await;

    let order: Vec<&str> = assignments
        .iter()
        .map(|a| a.task.description.as_str())
        .collect();
    assert_eq!(order, vec!["critical", "normal-1", "normal-2", "low"]);
}

/// Test: Assignments progress to a terminal state
/// Given one working and one broken agent type
/// When tasks are distributed
/// Then they start pending and end completed or failed
#[tokio::test]
async fn test_assignment_lifecycle() {
    let coordinator = coordinator_with(vec![
        ScriptedAgent::new("coder").into_agent(),
        ScriptedAgent::new("broken").always_failing().into_agent(),
    ])
    .await;
    let tasks = vec![
        DelegateTask::new("works").for_type("coder").with_input(json!({"n": 1})),
        DelegateTask::new("fails").for_type("broken"),
    ];

    let returned = coordinator.distribute_tasks(tasks, None).await;
    assert!(returned.iter().all(|a| a.status == AssignmentStatus::Pending));

    let finished = wait_for_assignments(&coordinator, Duration::from_secs(2)).await;
    assert_eq!(count_status(&finished, &AssignmentStatus::Completed), 1);

    let failed = coordinator.assignment(returned[1].task_id()).await.unwrap();
    assert!(matches!(failed.status, AssignmentStatus::Failed { .. }));
    assert!(failed.started_at.is_some());
    assert!(failed.completed_at.is_some());

    let stats = coordinator.get_statistics();
    assert_eq!(stats.tasks_queued, 2);
    assert_eq!(stats.tasks_completed, 1);
    assert_eq!(stats.tasks_failed, 1);

    assert_eq!(coordinator.clear_finished_assignments().await, 2);
    assert!(coordinator.assignments().await.is_empty());
}

/// Test: Provisioning skips unresolvable requirements
/// Given a registry that only knows "coder"
/// When one coder and one designer requirement are provisioned
/// Then only coder ids are returned and the failure is recorded
#[tokio::test]
async fn test_spawn_agents_skips_unknown_type() {
    let pool = LocalAgentPool::new();
    register_scripted(&pool, "coder").await;
    let coordinator = Coordinator::new(Arc::new(pool), Config::default());

    let ids = coordinator
        .spawn_agents(&[
            AgentRequirement::new("designer", 1),
            AgentRequirement::new("coder", 2).with_capabilities(["rust"]),
        ])
        .await;

    assert_eq!(ids.len(), 2);
    let coders = coordinator.pool().list_by_type("coder").await;
    assert_eq!(coders.iter().map(|h| h.id()).collect::<Vec<_>>(), ids);
    assert!(coders.iter().all(|h| h.has_capabilities(&["rust".to_string()])));

    let failures = coordinator.provision_failures().await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].agent_type, "designer");
    assert_eq!(coordinator.get_statistics().spawn_failures, 1);
}

/// Test: Distribution over an empty pool
/// Given a pool with no agents
/// When tasks are distributed with every strategy
/// Then nothing is assigned
#[tokio::test]
async fn test_empty_pool_assigns_nothing() {
    let coordinator = Coordinator::new(pool_with(Vec::new()).await, Config::default());

    for strategy in [
        DistributionStrategy::RoundRobin,
        DistributionStrategy::CapabilityMatch,
        DistributionStrategy::LoadBalanced,
    ] {
        let assignments = coordinator
            .distribute_tasks(typed_tasks(3, "coder"), Some(strategy))
            .await;
        assert!(assignments.is_empty(), "{} assigned tasks", strategy);
    }
}
