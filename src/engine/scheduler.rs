// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Dependency-aware concurrent flow runner.
//!
//! Execution is not stage-sequential: a node becomes eligible the moment
//! every in-plan predecessor completed, whatever stage it sits in. A
//! single scheduler loop owns the pending-count map and the ready queue;
//! spawned node tasks report back over an mpsc channel. Parallelism is
//! bounded by `max_parallel_workers`; a bound of one degrades to
//! sequential execution in stage order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::{CacheEntry, ResultCache};
use crate::fingerprint::FingerprintLocks;
use crate::graph::{FlowGraph, InputSlot, NodeId, NodeState};
use crate::kernel::KernelCoordinator;
use crate::observability::messages::{engine as engine_messages, StructuredLog};
use crate::plan::{compute_execution_plan, PlanError, SkipReason};
use crate::worker::WorkerClient;

use super::context::ExecutionContext;
use super::executor::execute_node;
use super::progress::{ProgressEvent, ProgressSink};
use super::run_info::{unix_millis, NodeRunResult, RunInformation, SkipCause};
use super::transform::{NodeInputs, TransformRegistry};

/// Runs flows against a fixed set of collaborators.
pub struct FlowRunner {
    cache: Arc<ResultCache>,
    locks: Arc<FingerprintLocks>,
    registry: Arc<TransformRegistry>,
    worker: Option<Arc<WorkerClient>>,
    kernels: Option<Arc<KernelCoordinator>>,
}

impl FlowRunner {
    pub fn new(cache: Arc<ResultCache>, registry: Arc<TransformRegistry>) -> Self {
        Self {
            cache,
            locks: FingerprintLocks::new(),
            registry,
            worker: None,
            kernels: None,
        }
    }

    pub fn with_worker(mut self, worker: Arc<WorkerClient>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_kernels(mut self, kernels: Arc<KernelCoordinator>) -> Self {
        self.kernels = Some(kernels);
        self
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// Execute a flow: plan, schedule, collect per-node outcomes.
    ///
    /// The graph is the run's consistent snapshot; mutation rejection
    /// during a run is the registry's concern. Node states and errors
    /// are written back to the graph when the run ends.
    pub async fn run(
        &self,
        graph: &mut FlowGraph,
        flow_starts: &[NodeId],
        cancel: CancellationToken,
        progress: ProgressSink,
    ) -> Result<RunInformation, PlanError> {
        let start_ms = unix_millis();
        graph.refresh();
        self.cache.invalidate(graph.take_invalidated()).await;
        graph.reset_run_state();

        let starts = if flow_starts.is_empty() {
            graph.flow_starts()
        } else {
            flow_starts.to_vec()
        };
        let plan = compute_execution_plan(graph, &starts)?;

        let settings = graph.settings().clone();
        let max_parallel = settings.parallelism();
        let deadline = settings
            .run_deadline_seconds
            .map(|s| tokio::time::Instant::now() + std::time::Duration::from_secs(s));

        let ctx = ExecutionContext {
            flow_id: graph.flow_id(),
            settings,
            cache: Arc::clone(&self.cache),
            locks: Arc::clone(&self.locks),
            registry: Arc::clone(&self.registry),
            worker: self.worker.clone(),
            kernels: self.kernels.clone(),
            upstream: Arc::new(ExecutionContext::upstream_map(graph)),
            cancel: cancel.clone(),
            progress: progress.clone(),
        };

        progress.emit(ProgressEvent::RunStarted {
            flow_id: graph.flow_id(),
            node_count: plan.node_count(),
        });
        engine_messages::RunStarted {
            flow_id: graph.flow_id(),
            node_count: plan.node_count(),
            skipped: plan.skip_nodes.len(),
            max_parallel,
        }
        .log();

        // Pre-fill results for plan-time skips.
        let mut node_results: HashMap<NodeId, NodeRunResult> = HashMap::new();
        for (&node_id, &reason) in &plan.skip_nodes {
            let kind = graph
                .node(node_id)
                .map(|n| n.kind.as_str())
                .unwrap_or("unknown");
            let (cause, caused_by) = match reason {
                SkipReason::Invalid => (SkipCause::InvalidSettings, None),
                SkipReason::Unreachable => (SkipCause::Unreachable, None),
                SkipReason::UpstreamSkipped => (
                    SkipCause::UpstreamSkipped,
                    find_invalid_ancestor(graph, &plan.skip_nodes, node_id),
                ),
            };
            node_results.insert(node_id, NodeRunResult::skipped(node_id, kind, cause, caused_by));
        }

        let mut pending = plan.dep_graph.pending_count.clone();
        let successors = plan.dep_graph.successors.clone();
        let mut ready: VecDeque<NodeId> = plan.dep_graph.initial_ready.iter().copied().collect();
        let mut results_map: HashMap<NodeId, CacheEntry> = HashMap::new();

        let (done_tx, mut done_rx) =
            mpsc::unbounded_channel::<(NodeId, NodeRunResult, Option<CacheEntry>)>();

        let mut in_flight = 0usize;
        let mut run_failed = false;
        let mut cancelled = false;
        let mut deadline_hit = false;

        loop {
            // Fill the pool.
            while !cancelled && in_flight < max_parallel {
                let Some(node_id) = ready.pop_front() else { break };
                if node_results.contains_key(&node_id) {
                    continue;
                }
                let node = graph
                    .node(node_id)
                    .expect("planned node exists in snapshot")
                    .clone();
                let inputs = gather_inputs(graph, node_id, &results_map);
                let task_ctx = ctx.clone();
                let tx = done_tx.clone();
                tokio::spawn(async move {
                    let (record, entry) = execute_node(task_ctx, node, inputs).await;
                    let _ = tx.send((node_id, record, entry));
                });
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            let completion = tokio::select! {
                completion = done_rx.recv() => completion,
                _ = cancel.cancelled(), if !cancelled => {
                    warn!(flow_id = ctx.flow_id, "run cancelled; draining in-flight nodes");
                    cancelled = true;
                    continue;
                }
                _ = sleep_until_deadline(deadline), if deadline.is_some() && !cancelled => {
                    warn!(flow_id = ctx.flow_id, "run deadline expired");
                    deadline_hit = true;
                    run_failed = true;
                    cancel.cancel();
                    cancelled = true;
                    continue;
                }
            };
            let Some((node_id, record, entry)) = completion else {
                break;
            };
            in_flight -= 1;

            if record.success {
                if let Some(entry) = entry {
                    results_map.insert(node_id, entry);
                }
                if let Some(succs) = successors.get(&node_id) {
                    for &succ in succs {
                        if let Some(count) = pending.get_mut(&succ) {
                            *count -= 1;
                            if *count == 0 && !node_results.contains_key(&succ) {
                                ready.push_back(succ);
                            }
                        }
                    }
                }
            } else {
                let node = graph.node(node_id);
                let timed_out = record
                    .error_kind
                    .as_deref()
                    .map(|k| k == "timeout")
                    .unwrap_or(false);
                let tolerated = timed_out
                    && node
                        .map(|n| n.optional && !n.cache_results)
                        .unwrap_or(false);
                let was_cancelled = record.skip_cause == Some(SkipCause::Cancelled);
                if !tolerated && !was_cancelled {
                    run_failed = true;
                }
                skip_descendants(
                    node_id,
                    &record,
                    &successors,
                    graph,
                    &mut node_results,
                );
            }
            node_results.insert(node_id, record);
        }

        // Anything planned but never finished (cancellation path) is a
        // cancelled skip.
        for node_id in plan.all_nodes() {
            node_results.entry(node_id).or_insert_with(|| {
                let kind = graph
                    .node(node_id)
                    .map(|n| n.kind.as_str())
                    .unwrap_or("unknown");
                NodeRunResult::skipped(node_id, kind, SkipCause::Cancelled, None)
            });
        }

        let nodes_completed = node_results
            .values()
            .filter(|r| r.success && r.state == NodeState::Done)
            .count();
        let success = !run_failed && !cancelled;

        // Write transient state back into the graph.
        for (node_id, record) in &node_results {
            if let Some(node) = graph.node_mut(*node_id) {
                node.state = record.state;
                node.last_error = record.error.clone();
            }
        }

        let mut sorted_results: Vec<NodeRunResult> = node_results.into_values().collect();
        sorted_results.sort_by_key(|r| r.node_id);

        progress.emit(ProgressEvent::RunFinished {
            flow_id: ctx.flow_id,
            success,
        });
        engine_messages::RunFinished {
            flow_id: ctx.flow_id,
            success,
            nodes_completed,
            elapsed_ms: unix_millis().saturating_sub(start_ms),
        }
        .log();

        Ok(RunInformation {
            flow_id: ctx.flow_id,
            success,
            cancelled: cancelled && !deadline_hit,
            nodes_completed,
            start_ms,
            end_ms: unix_millis(),
            node_results: sorted_results,
        })
    }
}

async fn sleep_until_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resolve a node's inputs from the completed-results map.
fn gather_inputs(
    graph: &FlowGraph,
    node_id: NodeId,
    results: &HashMap<NodeId, CacheEntry>,
) -> NodeInputs {
    let mut inputs = NodeInputs::default();
    for (pred, slot) in graph.predecessors(node_id) {
        let Some(entry) = results.get(&pred).cloned() else {
            // Predecessor completed from cache without producing an
            // entry is impossible; a missing entry only happens for
            // skipped predecessors, which never schedule this node.
            continue;
        };
        match slot {
            InputSlot::Main => inputs.main.push(entry),
            InputSlot::Left => inputs.left = Some(entry),
            InputSlot::Right => inputs.right = Some(entry),
        }
    }
    inputs
}

/// Mark every not-yet-finished descendant of `node_id` skipped, pointing
/// at the ultimately failing node.
fn skip_descendants(
    node_id: NodeId,
    record: &NodeRunResult,
    successors: &HashMap<NodeId, Vec<NodeId>>,
    graph: &FlowGraph,
    node_results: &mut HashMap<NodeId, NodeRunResult>,
) {
    let ultimate = record.caused_by.unwrap_or(node_id);
    let cause = if record.skip_cause == Some(SkipCause::Cancelled) {
        SkipCause::Cancelled
    } else {
        SkipCause::UpstreamFailed
    };

    let mut queue: VecDeque<NodeId> = successors
        .get(&node_id)
        .map(|s| s.iter().copied().collect())
        .unwrap_or_default();
    let mut seen: HashSet<NodeId> = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) || node_results.contains_key(&current) {
            continue;
        }
        let kind = graph
            .node(current)
            .map(|n| n.kind.as_str())
            .unwrap_or("unknown");
        node_results.insert(
            current,
            NodeRunResult::skipped(current, kind, cause, Some(ultimate)),
        );
        if let Some(succs) = successors.get(&current) {
            queue.extend(succs.iter().copied());
        }
    }
}

/// For a node skipped because of an upstream problem at plan time, walk
/// up to the nearest invalid ancestor for the cause pointer.
fn find_invalid_ancestor(
    graph: &FlowGraph,
    skip_nodes: &HashMap<NodeId, SkipReason>,
    node_id: NodeId,
) -> Option<NodeId> {
    let mut queue: VecDeque<NodeId> = graph
        .predecessors(node_id)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    let mut seen = HashSet::new();
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        if skip_nodes.get(&current) == Some(&SkipReason::Invalid) {
            return Some(current);
        }
        queue.extend(graph.predecessors(current).into_iter().map(|(id, _)| id));
    }
    None
}

