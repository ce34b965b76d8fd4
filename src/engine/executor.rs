// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Execution of a single node: cache probe, fingerprint lock, transform
//! dispatch, materialisation and sealing.
//!
//! The at-most-one-build guarantee lives here: the fingerprint lock is
//! taken before building and the cache is re-probed after acquisition,
//! so a task that waited on a contended fingerprint adopts the sealed
//! result instead of rebuilding it.

use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::CacheEntry;
use crate::errors::ExecutionError;
use crate::graph::{Node, NodeKind, NodeState};
use crate::worker::{task_id_for, Operation, TaskMeta, WorkerResult};

use super::context::ExecutionContext;
use super::progress::ProgressEvent;
use super::run_info::{unix_millis, NodeRunResult};
use super::transform::{NodeInputs, TransformOutput};

/// Kinds whose materialisation always routes through the worker, even in
/// performance mode (unbounded intermediate size or no pushdown).
fn is_heavy(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::CrossJoin | NodeKind::GroupBy | NodeKind::Pivot
    )
}

/// Execute one node to a sealed cache entry.
///
/// Returns the run record plus the sealed entry on success; failures
/// carry the error in the record and no entry.
pub(crate) async fn execute_node(
    ctx: ExecutionContext,
    node: Node,
    inputs: NodeInputs,
) -> (NodeRunResult, Option<CacheEntry>) {
    let start_ms = unix_millis();
    ctx.progress.emit(ProgressEvent::NodeStarted {
        node_id: node.node_id,
    });

    let (result, entry) = match run_pipeline(&ctx, &node, inputs, start_ms).await {
        Ok((record, entry)) => (record, Some(entry)),
        Err(err) => {
            let record = failure_record(&node, start_ms, &err);
            (record, None)
        }
    };

    ctx.progress.emit(ProgressEvent::NodeFinished {
        node_id: node.node_id,
        state: result.state,
        was_cached: result.was_cached,
    });
    (result, entry)
}

async fn run_pipeline(
    ctx: &ExecutionContext,
    node: &Node,
    inputs: NodeInputs,
    start_ms: u64,
) -> Result<(NodeRunResult, CacheEntry), ExecutionError> {
    let fingerprint = node
        .fingerprint
        .ok_or_else(|| ExecutionError::Internal("scheduled node has no fingerprint".into()))?;

    // Fast path: a sealed entry means the whole upstream lineage is
    // unchanged, so the node is done without executing.
    if let Some(entry) = ctx.cache.probe(&fingerprint).await {
        debug!(node_id = node.node_id, fingerprint = %fingerprint, "cache hit");
        return Ok((success_record(node, start_ms, true), entry));
    }

    if ctx.cancel.is_cancelled() {
        return Err(ExecutionError::Cancelled);
    }

    // At-most-one-build: take the fingerprint lock, then re-probe in
    // case another task sealed the entry while we waited.
    let _guard = ctx.locks.acquire(fingerprint).await;
    if let Some(entry) = ctx.cache.probe(&fingerprint).await {
        debug!(node_id = node.node_id, fingerprint = %fingerprint, "sealed while waiting");
        return Ok((success_record(node, start_ms, true), entry));
    }
    if ctx.cancel.is_cancelled() {
        return Err(ExecutionError::Cancelled);
    }

    let transform = ctx
        .registry
        .get(node.kind)
        .ok_or(ExecutionError::TransformMissing(node.kind.as_str()))?;

    let build = async {
        let output = transform.run(ctx, node, &inputs).await?;
        seal_output(ctx, node, fingerprint, output).await
    };
    let entry = match node.timeout_seconds {
        Some(seconds) => {
            let limit = Duration::from_secs(seconds);
            match tokio::time::timeout(limit, build).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ExecutionError::Timeout {
                        node_id: node.node_id,
                        elapsed: limit,
                    })
                }
            }
        }
        None => build.await?,
    };

    Ok((success_record(node, start_ms, false), entry))
}

/// Apply the materialisation policy and seal the result.
///
/// Lazy plans stay lazy in performance mode; development mode, an
/// explicit `cache_results`, and heavy kinds materialise through the
/// worker. Without a usable worker the entry degrades to a lazy seal
/// (there is nothing in-process that can evaluate a plan).
async fn seal_output(
    ctx: &ExecutionContext,
    node: &Node,
    fingerprint: crate::fingerprint::Digest,
    output: TransformOutput,
) -> Result<CacheEntry, ExecutionError> {
    use crate::config::ExecutionMode;

    match output {
        TransformOutput::Plan(bytes) => {
            let wants_disk = ctx.settings.execution_mode == ExecutionMode::Development
                || node.cache_results
                || is_heavy(node.kind);
            if !wants_disk {
                let entry = CacheEntry::LazyPlan(std::sync::Arc::new(bytes));
                ctx.cache.seal(fingerprint, entry.clone()).await;
                return Ok(entry);
            }

            match ctx.materialisation_worker() {
                Some(worker) => {
                    let meta = TaskMeta {
                        task_id: task_id_for(&fingerprint, Operation::Store),
                        operation: Operation::Store,
                        flow_id: ctx.flow_id,
                        node_id: node.node_id,
                        kwargs: serde_json::Value::Null,
                    };
                    let node_id = node.node_id;
                    let progress = ctx.progress.clone();
                    let result = worker
                        .submit(&meta, &[bytes], &ctx.cancel, &mut |p| {
                            progress.emit(ProgressEvent::NodeProgress {
                                node_id,
                                progress: p,
                            });
                        })
                        .await?;
                    match result {
                        WorkerResult::Plan { bytes: scan, file_ref } => {
                            let path = std::path::PathBuf::from(&file_ref);
                            if path.exists() {
                                // Shared filesystem: adopt the worker's
                                // materialised file into the cache.
                                ctx.cache.seal_table_file(fingerprint, path).await
                            } else {
                                // Remote worker: keep the scan handle.
                                let entry =
                                    CacheEntry::LazyPlan(std::sync::Arc::new(scan));
                                ctx.cache.seal(fingerprint, entry.clone()).await;
                                Ok(entry)
                            }
                        }
                        other => Err(ExecutionError::Protocol(format!(
                            "store returned {other:?}"
                        ))),
                    }
                }
                None => {
                    warn!(
                        node_id = node.node_id,
                        "no worker available to materialise; sealing lazily"
                    );
                    let entry = CacheEntry::LazyPlan(std::sync::Arc::new(bytes));
                    ctx.cache.seal(fingerprint, entry.clone()).await;
                    Ok(entry)
                }
            }
        }
        TransformOutput::Table(path) => ctx.cache.seal_table_file(fingerprint, path).await,
        TransformOutput::External(url) => {
            let entry = CacheEntry::ExternalRef(url);
            ctx.cache.seal(fingerprint, entry.clone()).await;
            Ok(entry)
        }
        TransformOutput::Empty => {
            let entry = CacheEntry::LazyPlan(std::sync::Arc::new(Vec::new()));
            ctx.cache.seal(fingerprint, entry.clone()).await;
            Ok(entry)
        }
    }
}

fn success_record(node: &Node, start_ms: u64, was_cached: bool) -> NodeRunResult {
    NodeRunResult {
        node_id: node.node_id,
        kind: node.kind.as_str().to_string(),
        state: NodeState::Done,
        success: true,
        start_ms,
        end_ms: unix_millis(),
        was_cached,
        upstream_hash: node.fingerprint.map(|fp| fp.to_hex()),
        row_count: None,
        error: None,
        error_kind: None,
        skip_cause: None,
        caused_by: None,
    }
}

fn failure_record(node: &Node, start_ms: u64, err: &ExecutionError) -> NodeRunResult {
    let state = if err.is_cancelled() {
        NodeState::Skipped
    } else {
        NodeState::Failed
    };
    NodeRunResult {
        node_id: node.node_id,
        kind: node.kind.as_str().to_string(),
        state,
        success: false,
        start_ms,
        end_ms: unix_millis(),
        was_cached: false,
        upstream_hash: node.fingerprint.map(|fp| fp.to_hex()),
        row_count: None,
        error: Some(err.to_string()),
        error_kind: Some(err.kind_tag().to_string()),
        skip_cause: err
            .is_cancelled()
            .then_some(super::run_info::SkipCause::Cancelled),
        caused_by: None,
    }
}
