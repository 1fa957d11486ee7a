//! Step dependency graph and execution planning.
//!
//! `DependencyGraph` stores workflow steps as petgraph nodes in declaration
//! order, with an edge from each prerequisite to the step that needs it.
//! Planning peels the graph into batches: every step whose prerequisites
//! were all scheduled in earlier batches joins the next batch.

use crate::error::{Error, Result};
use crate::workflow::WorkflowStep;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Ordered batches of step ids. Steps within a batch may run concurrently;
/// batch `n + 1` only starts after every step of batch `n` is terminal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    batches: Vec<Vec<String>>,
}

impl ExecutionPlan {
    pub fn new(batches: Vec<Vec<String>>) -> Self {
        Self { batches }
    }

    pub fn batches(&self) -> &[Vec<String>] {
        &self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn step_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Split every batch into single-step batches, keeping batch order and
    /// declaration order within each batch.
    pub fn into_sequential(self) -> Self {
        Self {
            batches: self
                .batches
                .into_iter()
                .flatten()
                .map(|id| vec![id])
                .collect(),
        }
    }

    pub fn into_batches(self) -> Vec<Vec<String>> {
        self.batches
    }
}

/// Dependency graph over workflow step ids.
pub struct DependencyGraph {
    /// Nodes are step ids; an edge `a -> b` means `b` depends on `a`.
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Build a graph from declared steps and a dependency map.
    ///
    /// # Errors
    /// Returns `Error::Structural` if the map names an undeclared step.
    pub fn from_steps(
        steps: &[WorkflowStep],
        dependencies: &BTreeMap<String, BTreeSet<String>>,
    ) -> Result<Self> {
        let mut graph = Self::new();
        for step in steps {
            graph.add_step(&step.id);
        }
        for (step, prerequisites) in dependencies {
            if !graph.contains(step) {
                return Err(unknown_step(step));
            }
            for prerequisite in prerequisites {
                graph.add_dependency(step, prerequisite)?;
            }
        }
        Ok(graph)
    }

    /// Add a step. Adding an existing id returns its current index.
    pub fn add_step(&mut self, id: &str) -> NodeIndex {
        if let Some(&index) = self.index.get(id) {
            return index;
        }
        let index = self.graph.add_node(id.to_string());
        self.index.insert(id.to_string(), index);
        index
    }

    /// Record that `step` cannot start until `prerequisite` is terminal.
    pub fn add_dependency(&mut self, step: &str, prerequisite: &str) -> Result<()> {
        let to = *self.index.get(step).ok_or_else(|| unknown_step(step))?;
        let from = *self
            .index
            .get(prerequisite)
            .ok_or_else(|| unknown_step(prerequisite))?;
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn step_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Steps that `id` waits on, in declaration order.
    pub fn prerequisites(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Steps waiting on `id`, in declaration order.
    pub fn dependents(&self, id: &str) -> Vec<&str> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&str> {
        let Some(&index) = self.index.get(id) else {
            return Vec::new();
        };
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(index, direction).collect();
        nodes.sort();
        nodes
            .into_iter()
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Find a step that sits on a cycle.
    ///
    /// Among all cyclic components the one containing the earliest declared
    /// step wins, and that step is returned.
    pub fn find_cycle(&self) -> Option<String> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || self
                        .graph
                        .find_edge(component[0], component[0])
                        .is_some()
            })
            .filter_map(|component| component.into_iter().min())
            .min()
            .map(|index| self.graph[index].clone())
    }

    /// Resolve the graph into concurrently runnable batches.
    ///
    /// # Errors
    /// Returns `Error::CircularDependency` when some steps can never become
    /// ready.
    pub fn execution_plan(&self) -> Result<ExecutionPlan> {
        let mut unmet: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: Vec<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| unmet[n.index()] == 0)
            .collect();
        let mut scheduled = 0;
        let mut batches = Vec::new();

        while !ready.is_empty() {
            ready.sort();
            let mut next = Vec::new();
            for &node in &ready {
                for dependent in self.graph.neighbors_directed(node, Direction::Outgoing) {
                    let count = &mut unmet[dependent.index()];
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        next.push(dependent);
                    }
                }
            }
            scheduled += ready.len();
            batches.push(ready.iter().map(|&n| self.graph[n].clone()).collect());
            ready = next;
        }

        if scheduled < self.graph.node_count() {
            let step = self.find_cycle().unwrap_or_else(|| {
                self.graph
                    .node_indices()
                    .find(|n| unmet[n.index()] > 0)
                    .map(|n| self.graph[n].clone())
                    .unwrap_or_default()
            });
            return Err(Error::CircularDependency { step });
        }

        Ok(ExecutionPlan::new(batches))
    }
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("steps", &self.step_count())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

fn unknown_step(id: &str) -> Error {
    Error::Structural(format!("references unknown step {}", id))
}

/// Resolve `steps` and `dependencies` into an execution plan.
pub fn build_execution_plan(
    steps: &[WorkflowStep],
    dependencies: &BTreeMap<String, BTreeSet<String>>,
) -> Result<ExecutionPlan> {
    DependencyGraph::from_steps(steps, dependencies)?.execution_plan()
}
