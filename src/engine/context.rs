// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Shared collaborators handed to every node execution.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::ResultCache;
use crate::config::{ExecutionLocation, FlowSettings, ResolvedLocation};
use crate::fingerprint::FingerprintLocks;
use crate::graph::{FlowGraph, FlowId, NodeId};
use crate::kernel::KernelCoordinator;
use crate::worker::WorkerClient;

use super::progress::ProgressSink;
use super::transform::TransformRegistry;

/// Everything a node execution can reach: cache, locks, transforms, the
/// worker and kernel clients, cancellation and progress. Cheap to clone
/// per spawned task (all `Arc`s).
#[derive(Clone)]
pub struct ExecutionContext {
    pub flow_id: FlowId,
    pub settings: FlowSettings,
    pub cache: Arc<ResultCache>,
    pub locks: Arc<FingerprintLocks>,
    pub registry: Arc<TransformRegistry>,
    pub worker: Option<Arc<WorkerClient>>,
    pub kernels: Option<Arc<KernelCoordinator>>,
    /// Transitive ancestors per node, precomputed from the run snapshot;
    /// drives artifact availability for script nodes.
    pub upstream: Arc<HashMap<NodeId, Vec<NodeId>>>,
    pub cancel: CancellationToken,
    pub progress: ProgressSink,
}

impl ExecutionContext {
    /// Precompute the ancestor map for a graph snapshot.
    pub fn upstream_map(graph: &FlowGraph) -> HashMap<NodeId, Vec<NodeId>> {
        graph
            .node_ids()
            .into_iter()
            .map(|id| (id, graph.upstream_of(id)))
            .collect()
    }

    pub fn ancestors_of(&self, node_id: NodeId) -> Vec<NodeId> {
        self.upstream.get(&node_id).cloned().unwrap_or_default()
    }

    /// The worker to materialise through, honoring the flow's execution
    /// location. An explicit `local` location keeps heavy lifting out of
    /// the worker even when one is configured.
    pub fn materialisation_worker(&self) -> Option<&Arc<WorkerClient>> {
        let location: ExecutionLocation = self.settings.execution_location;
        match location.resolve(self.worker.is_some()) {
            ResolvedLocation::Remote => self.worker.as_ref(),
            ResolvedLocation::Local => None,
        }
    }
}
