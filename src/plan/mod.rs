// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution planning: skip set, Kahn layering and the dependency graph
//! the scheduler consumes.
//!
//! The planner is pure: given a flow graph and optional flow starts it
//! produces an [`ExecutionPlan`] in O(V + E) without touching any state.
//! Stages are a topological layering (every node's predecessors live in
//! strictly earlier stages); the dependency graph drives the
//! dependency-aware scheduler, which is free to start a node the moment
//! its own predecessors finish regardless of stage boundaries.
//!
//! # Examples
//!
//! ## Planning a linear chain
//! ```
//! use flowfile_core::config::FlowSettings;
//! use flowfile_core::graph::{FlowGraph, InputSlot, NodeKind, NodePromise, NodeSettings};
//! use flowfile_core::plan::compute_execution_plan;
//! use serde_json::json;
//!
//! let mut graph = FlowGraph::new(1, "demo", FlowSettings::default());
//! for (id, kind) in [(1, NodeKind::ManualInput), (2, NodeKind::Filter)] {
//!     graph.add_node(NodePromise {
//!         node_id: id,
//!         kind,
//!         position_x: 0.0,
//!         position_y: 0.0,
//!         description: String::new(),
//!     }).unwrap();
//! }
//! graph.set_node_settings(
//!     1,
//!     NodeSettings::from_value(NodeKind::ManualInput, json!({"data": [{"a": 1}]})).unwrap(),
//! ).unwrap();
//! graph.set_node_settings(
//!     2,
//!     NodeSettings::from_value(NodeKind::Filter, json!({"predicate": "a > 0"})).unwrap(),
//! ).unwrap();
//! graph.connect(1, 2, InputSlot::Main).unwrap();
//!
//! let plan = compute_execution_plan(&graph, &[]).unwrap();
//! assert_eq!(plan.stages.len(), 2);
//! assert_eq!(plan.dep_graph.initial_ready, vec![1]);
//! assert_eq!(plan.dep_graph.pending_count[&2], 1);
//! ```
//!
//! ## Broken nodes land in the skip set
//! ```
//! use flowfile_core::config::FlowSettings;
//! use flowfile_core::graph::{FlowGraph, NodeKind, NodePromise};
//! use flowfile_core::plan::compute_execution_plan;
//!
//! let mut graph = FlowGraph::new(1, "demo", FlowSettings::default());
//! // A filter with no settings is incorrect until configured.
//! graph.add_node(NodePromise {
//!     node_id: 9,
//!     kind: NodeKind::Filter,
//!     position_x: 0.0,
//!     position_y: 0.0,
//!     description: String::new(),
//! }).unwrap();
//!
//! let plan = compute_execution_plan(&graph, &[]).unwrap();
//! assert!(plan.skip_nodes.contains_key(&9));
//! assert!(plan.stages.is_empty());
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use crate::graph::{FlowGraph, NodeId};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The edge relation contains a cycle. Mutations reject cycles, so
    /// hitting this means a graph invariant was violated upstream.
    #[error("cycle detected while staging execution")]
    CycleDetected,
}

/// Why a node is in the skip set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Settings missing/invalid or a required input absent.
    Invalid,
    /// An ancestor is skipped.
    UpstreamSkipped,
    /// Not reachable from the designated flow starts.
    Unreachable,
}

/// One topological layer; all members have zero unresolved dependencies
/// once the prior stages complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub nodes: Vec<NodeId>,
}

impl Stage {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Scheduler-facing dependency bookkeeping, restricted to in-plan nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeDependencyGraph {
    /// Number of in-plan predecessors not yet completed.
    pub pending_count: HashMap<NodeId, usize>,
    /// In-plan children of each node.
    pub successors: HashMap<NodeId, Vec<NodeId>>,
    /// Nodes executable immediately (pending count zero).
    pub initial_ready: Vec<NodeId>,
}

/// The planner's output: what to skip, the staged order, and the
/// dependency graph for the scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub skip_nodes: HashMap<NodeId, SkipReason>,
    pub stages: Vec<Stage>,
    pub dep_graph: NodeDependencyGraph,
}

impl ExecutionPlan {
    /// All runnable nodes in stage order.
    pub fn all_nodes(&self) -> Vec<NodeId> {
        self.stages
            .iter()
            .flat_map(|stage| stage.nodes.iter().copied())
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.stages.iter().map(Stage::len).sum()
    }
}

/// Compute the execution plan for a graph.
///
/// `flow_starts` restricts planning to nodes reachable from those roots;
/// when empty, every zero-in-degree node seeds the traversal. Incorrect
/// nodes and all their descendants land in the skip set; unreachable
/// nodes are skipped with their own reason rather than treated as a
/// staging error.
pub fn compute_execution_plan(
    graph: &FlowGraph,
    flow_starts: &[NodeId],
) -> Result<ExecutionPlan, PlanError> {
    let all_ids: Vec<NodeId> = graph.node_ids();

    // Reachability from the designated roots.
    let roots: Vec<NodeId> = if flow_starts.is_empty() {
        graph.topological_roots()
    } else {
        flow_starts.to_vec()
    };
    let mut reachable: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<NodeId> = roots
        .iter()
        .copied()
        .filter(|id| graph.node(*id).is_some())
        .collect();
    while let Some(node_id) = queue.pop_front() {
        if reachable.insert(node_id) {
            for succ in graph.successors(node_id) {
                queue.push_back(succ);
            }
        }
    }

    // Skip set: unreachable, invalid, and everything downstream of
    // invalid (cache-invalidation-style traversal).
    let mut skip_nodes: HashMap<NodeId, SkipReason> = HashMap::new();
    for &node_id in &all_ids {
        if !reachable.contains(&node_id) {
            skip_nodes.insert(node_id, SkipReason::Unreachable);
        }
    }
    let mut invalid_frontier: VecDeque<NodeId> = VecDeque::new();
    for &node_id in &all_ids {
        if reachable.contains(&node_id) {
            let node = graph.node(node_id).expect("id from graph");
            if !node.is_correct {
                skip_nodes.insert(node_id, SkipReason::Invalid);
                invalid_frontier.push_back(node_id);
            }
        }
    }
    while let Some(node_id) = invalid_frontier.pop_front() {
        for succ in graph.successors(node_id) {
            if reachable.contains(&succ) && !skip_nodes.contains_key(&succ) {
                skip_nodes.insert(succ, SkipReason::UpstreamSkipped);
                invalid_frontier.push_back(succ);
            }
        }
    }

    // Kahn layering over the surviving nodes.
    let in_plan =
        |id: &NodeId| reachable.contains(id) && !skip_nodes.contains_key(id);

    let mut in_degree: HashMap<NodeId, usize> = HashMap::new();
    let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for &node_id in all_ids.iter().filter(|id| in_plan(id)) {
        in_degree.insert(node_id, 0);
        successors.insert(node_id, Vec::new());
    }
    for edge in graph.edges() {
        if in_plan(&edge.from) && in_plan(&edge.to) {
            *in_degree.get_mut(&edge.to).expect("in-plan node") += 1;
            successors
                .get_mut(&edge.from)
                .expect("in-plan node")
                .push(edge.to);
        }
    }
    for succs in successors.values_mut() {
        succs.sort_unstable();
        succs.dedup();
    }

    let pending_count = in_degree.clone();
    let mut initial_ready: Vec<NodeId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    initial_ready.sort_unstable();

    let mut stages: Vec<Stage> = Vec::new();
    let mut frontier = initial_ready.clone();
    let mut staged = 0usize;
    while !frontier.is_empty() {
        staged += frontier.len();
        let mut next: Vec<NodeId> = Vec::new();
        for &node_id in &frontier {
            for &succ in &successors[&node_id] {
                let deg = in_degree.get_mut(&succ).expect("in-plan node");
                *deg -= 1;
                if *deg == 0 {
                    next.push(succ);
                }
            }
        }
        next.sort_unstable();
        stages.push(Stage { nodes: frontier });
        frontier = next;
    }

    if staged != pending_count.len() {
        return Err(PlanError::CycleDetected);
    }

    Ok(ExecutionPlan {
        skip_nodes,
        stages,
        dep_graph: NodeDependencyGraph {
            pending_count,
            successors,
            initial_ready,
        },
    })
}
