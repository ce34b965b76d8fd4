// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The flow graph: node map, slotted edge set and mutation API.
//!
//! All mutations are transactional with respect to graph invariants: a
//! rejected mutation (cycle, slot conflict, shape mismatch, missing node)
//! leaves the topology exactly as it was. Every successful mutation
//! recomputes fingerprints for the affected node and its transitive
//! descendants; the digests that became stale accumulate in an
//! invalidation set the owner drains into the result cache.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::FlowSettings;
use crate::errors::{GraphError, SettingsError};
use crate::fingerprint::{node_fingerprint, Digest};

use super::node::{InputSlot, Node, NodePromise, NodeState};
use super::settings::NodeSettings;
use super::{FlowId, NodeId};

/// A directed edge `(from, to, slot)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
    pub slot: InputSlot,
}

/// A validated DAG of typed nodes plus its settings.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    flow_id: FlowId,
    name: String,
    settings: FlowSettings,
    nodes: HashMap<NodeId, Node>,
    edges: Vec<Edge>,
    /// Fingerprints dropped by mutations since the last drain; the owner
    /// prunes the result cache with these.
    invalidated: HashSet<Digest>,
}

impl FlowGraph {
    pub fn new(flow_id: FlowId, name: impl Into<String>, settings: FlowSettings) -> Self {
        Self {
            flow_id,
            name: name.into(),
            settings,
            nodes: HashMap::new(),
            edges: Vec::new(),
            invalidated: HashSet::new(),
        }
    }

    pub fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn settings_mut(&mut self) -> &mut FlowSettings {
        &mut self.settings
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Insert an unconfigured node. State is idle, fingerprint empty,
    /// `is_correct = false` until settings are supplied.
    pub fn add_node(&mut self, promise: NodePromise) -> Result<NodeId, GraphError> {
        let node_id = promise.node_id;
        if self.nodes.contains_key(&node_id) {
            return Err(GraphError::NodeIdTaken(node_id));
        }
        self.nodes.insert(node_id, Node::from_promise(promise));
        Ok(node_id)
    }

    /// Validate and assign a settings payload.
    ///
    /// On validation failure the previous settings stay in place and the
    /// errors are returned; nothing else changes. On success the node's
    /// fingerprint and every descendant's fingerprint are recomputed and
    /// the stale digests join the invalidation set.
    pub fn set_node_settings(
        &mut self,
        node_id: NodeId,
        settings: NodeSettings,
    ) -> Result<(), SetSettingsError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(SetSettingsError::Graph(GraphError::MissingNode(node_id)))?;
        if node.kind != settings.kind() {
            return Err(SetSettingsError::Graph(GraphError::KindMismatch {
                node: node_id,
                expected: node.kind.as_str(),
                got: settings.kind().as_str(),
            }));
        }
        let errors = settings.validate();
        if !errors.is_empty() {
            return Err(SetSettingsError::Invalid(errors));
        }

        let node = self.nodes.get_mut(&node_id).expect("checked above");
        node.settings = Some(settings);
        self.refresh();
        Ok(())
    }

    /// Connect `from -> to` on `slot`.
    pub fn connect(
        &mut self,
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    ) -> Result<(), GraphError> {
        let to_node = self.nodes.get(&to).ok_or(GraphError::MissingNode(to))?;
        if !self.nodes.contains_key(&from) {
            return Err(GraphError::MissingNode(from));
        }

        // Cycle check first: a back edge is reported as a cycle even when
        // the target slot would also have rejected it. The new edge
        // from -> to creates a cycle iff `from` is already reachable from
        // `to`.
        if from == to || self.reachable_from(to).contains(&from) {
            return Err(GraphError::CycleDetected { from, to });
        }

        let shape = to_node.input_shape();
        if !shape.accepts(slot) {
            return Err(GraphError::ShapeMismatch {
                node: to,
                kind: to_node.kind.as_str(),
                slot,
            });
        }

        if self
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to && e.slot == slot)
        {
            return Err(GraphError::DuplicateEdge { from, to, slot });
        }

        // Left/right carry a single edge; a bounded main slot fills up at
        // its capacity.
        let occupied = self.edges.iter().filter(|e| e.to == to && e.slot == slot).count();
        let capacity = match slot {
            InputSlot::Main => shape.main_capacity(),
            InputSlot::Left | InputSlot::Right => Some(1),
        };
        if let Some(capacity) = capacity {
            if occupied >= capacity {
                return Err(GraphError::SlotOccupied { node: to, slot });
            }
        }

        self.edges.push(Edge { from, to, slot });
        self.refresh();
        Ok(())
    }

    /// Remove the edge `from -> to` on `slot`.
    pub fn disconnect(
        &mut self,
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    ) -> Result<(), GraphError> {
        let before = self.edges.len();
        self.edges
            .retain(|e| !(e.from == from && e.to == to && e.slot == slot));
        if self.edges.len() == before {
            return Err(GraphError::EdgeNotFound { from, to, slot });
        }
        self.refresh();
        Ok(())
    }

    /// Delete a node and every incident edge. Downstream nodes that lose
    /// a required input become incorrect on the refresh pass.
    pub fn delete_node(&mut self, node_id: NodeId) -> Result<(), GraphError> {
        let node = self
            .nodes
            .remove(&node_id)
            .ok_or(GraphError::MissingNode(node_id))?;
        if let Some(fp) = node.fingerprint {
            self.invalidated.insert(fp);
        }
        self.edges.retain(|e| e.from != node_id && e.to != node_id);
        self.refresh();
        Ok(())
    }

    /// Drain the set of fingerprints stale since the last drain.
    pub fn take_invalidated(&mut self) -> HashSet<Digest> {
        std::mem::take(&mut self.invalidated)
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Nodes with no incoming edges.
    pub fn topological_roots(&self) -> Vec<NodeId> {
        let targets: HashSet<NodeId> = self.edges.iter().map(|e| e.to).collect();
        let mut roots: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| !targets.contains(id))
            .collect();
        roots.sort_unstable();
        roots
    }

    /// Direct successors of a node.
    pub fn successors(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut out: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| e.from == node_id)
            .map(|e| e.to)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }

    /// Direct predecessors, with slot information preserved.
    pub fn predecessors(&self, node_id: NodeId) -> Vec<(NodeId, InputSlot)> {
        self.edges
            .iter()
            .filter(|e| e.to == node_id)
            .map(|e| (e.from, e.slot))
            .collect()
    }

    /// All transitive descendants of a node (excluding the node itself).
    pub fn leads_to(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut reachable: Vec<NodeId> = self.reachable_from(node_id).into_iter().collect();
        reachable.sort_unstable();
        reachable
    }

    /// All transitive ancestors of a node (excluding the node itself).
    /// Drives artifact availability: only ancestors on the same kernel
    /// can supply artifacts.
    pub fn upstream_of(&self, node_id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self
            .predecessors(node_id)
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                for (pred, _) in self.predecessors(current) {
                    queue.push_back(pred);
                }
            }
        }
        let mut out: Vec<NodeId> = seen.into_iter().collect();
        out.sort_unstable();
        out
    }

    /// Caller-designated run roots, if any were flagged.
    pub fn flow_starts(&self) -> Vec<NodeId> {
        let mut starts: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| n.is_start_node)
            .map(|n| n.node_id)
            .collect();
        starts.sort_unstable();
        starts
    }

    /// Reset transient per-run state on every node.
    pub fn reset_run_state(&mut self) {
        for node in self.nodes.values_mut() {
            node.state = NodeState::Idle;
            node.last_error = None;
        }
    }

    // ------------------------------------------------------------------
    // Refresh: correctness + fingerprints
    // ------------------------------------------------------------------

    /// Recompute `is_correct` and fingerprints across the whole graph.
    ///
    /// Runs after every successful mutation. O(V + E) plus hashing. Any
    /// node whose fingerprint changed (or vanished) contributes its old
    /// digest to the invalidation set.
    pub fn refresh(&mut self) {
        let order = match self.topo_order() {
            Some(order) => order,
            // A cycle can only appear through direct struct manipulation
            // in tests; mutations reject cycles before committing.
            None => return,
        };

        let mut correct: HashMap<NodeId, bool> = HashMap::new();
        let mut digests: HashMap<NodeId, Option<Digest>> = HashMap::new();

        for node_id in order {
            let node = &self.nodes[&node_id];
            let preds = self.predecessors(node_id);
            let shape = node.input_shape();

            let slots_ok = shape.required_slots().iter().all(|required| {
                preds.iter().any(|(_, slot)| slot == required)
            });
            let inputs_ok = preds
                .iter()
                .all(|(pred, _)| correct.get(pred).copied().unwrap_or(false));
            let settings_ok = node
                .settings
                .as_ref()
                .map(|s| s.validate().is_empty())
                .unwrap_or(false);

            let is_correct = settings_ok && slots_ok && inputs_ok;
            correct.insert(node_id, is_correct);

            let digest = if is_correct {
                let input_digests: Option<Vec<Digest>> = preds
                    .iter()
                    .map(|(pred, _)| digests.get(pred).copied().flatten())
                    .collect();
                match (node.settings.as_ref(), input_digests) {
                    (Some(settings), Some(inputs)) => settings
                        .fingerprint_bytes()
                        .ok()
                        .map(|bytes| node_fingerprint(node.kind.as_str(), &bytes, &inputs)),
                    _ => None,
                }
            } else {
                None
            };
            digests.insert(node_id, digest);
        }

        for (node_id, node) in self.nodes.iter_mut() {
            let new_correct = correct.get(node_id).copied().unwrap_or(false);
            let new_digest = digests.get(node_id).copied().flatten();
            if node.fingerprint != new_digest {
                if let Some(old) = node.fingerprint {
                    self.invalidated.insert(old);
                }
            }
            node.is_correct = new_correct;
            node.fingerprint = new_digest;
        }
    }

    /// Kahn topological order over all nodes; `None` on a cycle.
    fn topo_order(&self) -> Option<Vec<NodeId>> {
        let mut in_degree: HashMap<NodeId, usize> =
            self.nodes.keys().map(|&id| (id, 0)).collect();
        for edge in &self.edges {
            *in_degree.entry(edge.to).or_insert(0) += 1;
        }

        let mut ready: Vec<NodeId> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&id, _)| id)
            .collect();
        ready.sort_unstable();

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue: VecDeque<NodeId> = ready.into();
        while let Some(node_id) = queue.pop_front() {
            order.push(node_id);
            for succ in self.successors(node_id) {
                let deg = in_degree.get_mut(&succ).expect("edge target exists");
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(succ);
                }
            }
        }

        (order.len() == self.nodes.len()).then_some(order)
    }

    /// Set of nodes reachable from `node_id` (excluding itself unless it
    /// sits on a cycle, which mutations make impossible).
    fn reachable_from(&self, node_id: NodeId) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<NodeId> = self.successors(node_id).into();
        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                for succ in self.successors(current) {
                    queue.push_back(succ);
                }
            }
        }
        seen
    }
}

/// Outcome of `set_node_settings`: either a graph-level rejection or a
/// list of structural validation errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SetSettingsError {
    Graph(GraphError),
    Invalid(Vec<SettingsError>),
}

impl std::fmt::Display for SetSettingsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SetSettingsError::Graph(err) => write!(f, "{err}"),
            SetSettingsError::Invalid(errors) => {
                write!(f, "invalid settings: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for SetSettingsError {}
