//! Merger: groups subtasks into sequential execution phases.
//!
//! The dependency edges form a `petgraph` DAG. Each subtask's level is one
//! more than the deepest of its prerequisites, taken in topological order,
//! so every subtask lands in the earliest phase it can and the phase count
//! is the longest dependency chain. Members of a phase are listed in
//! declared order.

use conductor_core::error::PlanningError;
use conductor_core::plan::{
    Decomposition, DependencyEdge, ExecutionPhase, MergedPlan, MiniPlan, SubtaskDescriptor,
};
use petgraph::Direction;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Dependency graph over subtask orders; an edge runs prerequisite → dependent.
pub(crate) struct DependencyGraph {
    graph: DiGraph<usize, ()>,
    /// Declared order → node, kept sorted for phase ordering.
    nodes: BTreeMap<usize, NodeIndex>,
}

impl DependencyGraph {
    /// Build from `(prerequisite, dependent)` pairs. Edges touching unknown
    /// nodes and repeated edges are ignored.
    pub fn new(nodes: &[usize], edges: &[(usize, usize)]) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for node in nodes {
            index.entry(*node).or_insert_with(|| graph.add_node(*node));
        }

        let unique: BTreeSet<(usize, usize)> = edges.iter().copied().collect();
        for (prerequisite, dependent) in unique {
            if let (Some(from), Some(to)) = (index.get(&prerequisite), index.get(&dependent)) {
                graph.add_edge(*from, *to, ());
            }
        }
        Self { graph, nodes: index }
    }

    pub fn is_cyclic(&self) -> bool {
        is_cyclic_directed(&self.graph)
    }

    /// Orders grouped by execution level, or `None` when the graph has a cycle.
    pub fn levels(&self) -> Option<Vec<Vec<usize>>> {
        let sorted = toposort(&self.graph, None).ok()?;

        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        for node in sorted {
            let depth = self
                .graph
                .neighbors_directed(node, Direction::Incoming)
                .filter_map(|p| level.get(&p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(node, depth);
        }

        let count = level.values().max().map_or(0, |deepest| deepest + 1);
        let mut out = vec![Vec::new(); count];
        for (order, node) in &self.nodes {
            if let Some(depth) = level.get(node) {
                out[*depth].push(*order);
            }
        }
        Some(out)
    }
}

/// Execution phases for `subtasks` under `edges`.
pub fn phases(
    subtasks: &[SubtaskDescriptor],
    edges: &[DependencyEdge],
) -> Result<Vec<ExecutionPhase>, PlanningError> {
    let by_id: BTreeMap<_, _> = subtasks.iter().map(|s| (s.id.clone(), s.order)).collect();
    let by_order: BTreeMap<_, _> = subtasks.iter().map(|s| (s.order, s.id.clone())).collect();

    let nodes: Vec<usize> = by_order.keys().copied().collect();
    let pairs: Vec<(usize, usize)> = edges
        .iter()
        .filter_map(|e| Some((*by_id.get(&e.prerequisite)?, *by_id.get(&e.dependent)?)))
        .collect();

    let layered = DependencyGraph::new(&nodes, &pairs).levels().ok_or_else(|| {
        PlanningError::CycleDetected(format!("{} subtasks, {} edges", nodes.len(), pairs.len()))
    })?;

    Ok(layered
        .into_iter()
        .enumerate()
        .map(|(index, orders)| ExecutionPhase {
            index,
            subtask_ids: orders
                .into_iter()
                .filter_map(|o| by_order.get(&o).cloned())
                .collect(),
        })
        .collect())
}

/// Combine a decomposition and its mini-plans into a phase-ordered plan.
///
/// Mini-plans are put in subtask order; a subtask without one gets an empty
/// plan flagged for clarification.
pub fn merge(
    goal: &str,
    decomposition: &Decomposition,
    miniplans: Vec<MiniPlan>,
) -> Result<MergedPlan, PlanningError> {
    let phases = phases(&decomposition.subtasks, &decomposition.edges)?;

    let mut by_id: BTreeMap<_, _> = miniplans.into_iter().map(|p| (p.subtask_id.clone(), p)).collect();
    let miniplans = decomposition
        .subtasks
        .iter()
        .map(|s| {
            by_id
                .remove(&s.id)
                .unwrap_or_else(|| MiniPlan::needs_clarification(s.id.clone(), "no mini-plan was produced"))
        })
        .collect();

    debug!(
        subtasks = decomposition.subtasks.len(),
        phases = phases.len(),
        "Plan merged"
    );

    Ok(MergedPlan {
        goal: goal.to_string(),
        subtasks: decomposition.subtasks.clone(),
        edges: decomposition.edges.clone(),
        miniplans,
        phases,
        risks: Vec::new(),
    })
}
