// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run-time error taxonomy.
//!
//! Every error that can surface during a run is one of these kinds. The
//! scheduler records the error against the offending node and marks all
//! descendants skipped with a pointer to the ultimate cause; errors are
//! never silently dropped.

use std::time::Duration;
use thiserror::Error;

use crate::graph::NodeId;

/// Errors raised while executing a flow.
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    /// A transform raised while executing a node.
    #[error("node {node_id} failed: {message}")]
    NodeFailed { node_id: NodeId, message: String },

    /// The worker refused the task because its process pool is saturated.
    /// Retried once after a short backoff before surfacing.
    #[error("worker at capacity: {0}")]
    WorkerAtCapacity(String),

    /// The streaming connection to the worker dropped mid-task.
    #[error("worker connection lost for task {task_id}: {message}")]
    WorkerDisconnect { task_id: String, message: String },

    /// The worker reported a task failure.
    #[error("worker task {task_id} failed: {message}")]
    WorkerTaskFailed { task_id: String, message: String },

    /// A kernel failed its health check or refused the request.
    #[error("kernel '{kernel_id}' unhealthy: {message}")]
    KernelUnhealthy { kernel_id: String, message: String },

    /// User code inside a kernel raised.
    #[error("kernel script on node {node_id} failed: {message}")]
    KernelScriptFailed { node_id: NodeId, message: String },

    /// An artifact name was published twice by the same node in one run.
    #[error("artifact '{0}' already exists")]
    ArtifactAlreadyExists(String),

    /// A script asked for an artifact outside its availability set.
    #[error("artifact '{name}' is not available to node {node_id}")]
    ArtifactUnavailable { name: String, node_id: NodeId },

    /// A node exceeded its deadline and was cancelled.
    #[error("node {node_id} timed out after {elapsed:?}")]
    Timeout { node_id: NodeId, elapsed: Duration },

    /// The run was cancelled; propagated from every suspension point.
    #[error("cancelled")]
    Cancelled,

    /// A sealed cache entry failed its checksum; the entry is discarded
    /// and rebuilt transparently, so this only surfaces on I/O failure
    /// during the discard.
    #[error("cache entry for {fingerprint} is corrupt: {message}")]
    CacheCorruption {
        fingerprint: String,
        message: String,
    },

    /// A read node points at a file that does not exist.
    #[error("file not found: {0}")]
    FileMissing(String),

    /// Local I/O failure (cache writes, materialised reads).
    #[error("i/o error: {0}")]
    Io(String),

    /// Wire-level protocol violation from the worker or a kernel.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No transform is registered for a node kind that reached dispatch.
    #[error("no transform registered for kind '{0}'")]
    TransformMissing(&'static str),

    /// Internal invariant violation; indicates a bug in the engine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExecutionError {
    /// Short machine-readable tag for the error kind, carried in run
    /// summaries next to the human-readable message.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            ExecutionError::NodeFailed { .. } => "node_execution_error",
            ExecutionError::WorkerAtCapacity(_) => "worker_at_capacity",
            ExecutionError::WorkerDisconnect { .. } => "worker_disconnect",
            ExecutionError::WorkerTaskFailed { .. } => "worker_task_failed",
            ExecutionError::KernelUnhealthy { .. } => "kernel_unhealthy",
            ExecutionError::KernelScriptFailed { .. } => "kernel_script_failed",
            ExecutionError::ArtifactAlreadyExists(_) => "artifact_already_exists",
            ExecutionError::ArtifactUnavailable { .. } => "artifact_unavailable",
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Cancelled => "cancelled",
            ExecutionError::CacheCorruption { .. } => "cache_corruption",
            ExecutionError::FileMissing(_) => "file_missing",
            ExecutionError::Io(_) => "io",
            ExecutionError::Protocol(_) => "protocol",
            ExecutionError::TransformMissing(_) => "transform_missing",
            ExecutionError::Internal(_) => "internal",
        }
    }

    /// Whether the error is the cooperative-cancellation signal rather
    /// than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecutionError::Cancelled)
    }
}

impl From<std::io::Error> for ExecutionError {
    fn from(err: std::io::Error) -> Self {
        ExecutionError::Io(err.to_string())
    }
}
