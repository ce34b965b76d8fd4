// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Flow registry: owns every loaded flow and its run state.
//!
//! The registry is a plain value passed by reference, not a global; the
//! control plane holds one behind a mutex. During a run the scheduler
//! works on a snapshot of the graph and the registry rejects mutations
//! until the run ends or is cancelled.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::engine::RunInformation;
use crate::errors::GraphError;
use crate::graph::{FlowGraph, FlowId, InputSlot, NodeId, NodePromise, NodeSettings};
use crate::graph::SetSettingsError;

/// A registered flow plus its run bookkeeping.
pub struct Flow {
    pub graph: FlowGraph,
    pub last_run: Option<RunInformation>,
    cancel: Option<CancellationToken>,
}

impl Flow {
    pub fn is_running(&self) -> bool {
        self.cancel.is_some()
    }
}

/// Maps `flow_id -> Flow`.
#[derive(Default)]
pub struct FlowRegistry {
    flows: HashMap<FlowId, Flow>,
    next_id: FlowId,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self {
            flows: HashMap::new(),
            next_id: 1,
        }
    }

    /// Register a graph, keeping its id when free and allocating the
    /// next free id otherwise. Returns the id actually used.
    pub fn register(&mut self, mut graph: FlowGraph) -> FlowId {
        let mut flow_id = graph.flow_id();
        if flow_id <= 0 || self.flows.contains_key(&flow_id) {
            while self.flows.contains_key(&self.next_id) {
                self.next_id += 1;
            }
            flow_id = self.next_id;
            self.next_id += 1;
            graph = reid(graph, flow_id);
        }
        self.flows.insert(
            flow_id,
            Flow {
                graph,
                last_run: None,
                cancel: None,
            },
        );
        flow_id
    }

    pub fn flow(&self, flow_id: FlowId) -> Option<&Flow> {
        self.flows.get(&flow_id)
    }

    pub fn flow_ids(&self) -> Vec<FlowId> {
        let mut ids: Vec<FlowId> = self.flows.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn remove(&mut self, flow_id: FlowId) -> Option<Flow> {
        self.flows.remove(&flow_id)
    }

    // ------------------------------------------------------------------
    // Mutations, rejected while a run is active
    // ------------------------------------------------------------------

    pub fn add_node(
        &mut self,
        flow_id: FlowId,
        promise: NodePromise,
    ) -> Result<NodeId, GraphError> {
        self.mutable_graph(flow_id)?.add_node(promise)
    }

    pub fn set_node_settings(
        &mut self,
        flow_id: FlowId,
        node_id: NodeId,
        settings: NodeSettings,
    ) -> Result<(), SetSettingsError> {
        let graph = self
            .mutable_graph(flow_id)
            .map_err(SetSettingsError::Graph)?;
        graph.set_node_settings(node_id, settings)
    }

    pub fn connect(
        &mut self,
        flow_id: FlowId,
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    ) -> Result<(), GraphError> {
        self.mutable_graph(flow_id)?.connect(from, to, slot)
    }

    pub fn disconnect(
        &mut self,
        flow_id: FlowId,
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    ) -> Result<(), GraphError> {
        self.mutable_graph(flow_id)?.disconnect(from, to, slot)
    }

    pub fn delete_node(&mut self, flow_id: FlowId, node_id: NodeId) -> Result<(), GraphError> {
        self.mutable_graph(flow_id)?.delete_node(node_id)
    }

    // ------------------------------------------------------------------
    // Run lifecycle
    // ------------------------------------------------------------------

    /// Begin a run: returns a consistent snapshot of the graph and the
    /// run's cancellation token. Fails when a run is already active.
    pub fn begin_run(
        &mut self,
        flow_id: FlowId,
    ) -> Result<(FlowGraph, CancellationToken), GraphError> {
        let flow = self
            .flows
            .get_mut(&flow_id)
            .ok_or(GraphError::MissingNode(flow_id))?;
        if flow.cancel.is_some() {
            return Err(GraphError::RunInProgress);
        }
        let token = CancellationToken::new();
        flow.cancel = Some(token.clone());
        Ok((flow.graph.clone(), token))
    }

    /// Finish a run: adopt the snapshot's transient node states and
    /// store the summary.
    pub fn finish_run(&mut self, flow_id: FlowId, snapshot: FlowGraph, info: RunInformation) {
        if let Some(flow) = self.flows.get_mut(&flow_id) {
            for node_id in snapshot.node_ids() {
                if let (Some(from), Some(to)) =
                    (snapshot.node(node_id), flow.graph.node_mut(node_id))
                {
                    to.state = from.state;
                    to.last_error = from.last_error.clone();
                }
            }
            flow.last_run = Some(info);
            flow.cancel = None;
        }
    }

    /// Signal cancellation of an active run. Returns whether a run was
    /// in flight.
    pub fn cancel_run(&mut self, flow_id: FlowId) -> bool {
        match self.flows.get(&flow_id).and_then(|f| f.cancel.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn mutable_graph(&mut self, flow_id: FlowId) -> Result<&mut FlowGraph, GraphError> {
        let flow = self
            .flows
            .get_mut(&flow_id)
            .ok_or(GraphError::MissingNode(flow_id))?;
        if flow.cancel.is_some() {
            return Err(GraphError::RunInProgress);
        }
        Ok(&mut flow.graph)
    }
}

/// Rebuild a graph under a new flow id (ids are baked into the graph at
/// construction).
fn reid(graph: FlowGraph, flow_id: FlowId) -> FlowGraph {
    let document = crate::flowfile::graph_to_document(&graph);
    let mut renumbered = document;
    renumbered.flowfile_id = flow_id;
    crate::flowfile::document_to_graph(&renumbered)
        .expect("re-registering a valid graph cannot fail")
}
