// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run statistics returned to callers.

use serde::{Deserialize, Serialize};

use crate::graph::{FlowId, NodeId, NodeState};

/// Why a node was skipped, recorded verbatim in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    InvalidSettings,
    Unreachable,
    UpstreamSkipped,
    UpstreamFailed,
    Cancelled,
}

/// Outcome of a single node in one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRunResult {
    pub node_id: NodeId,
    pub kind: String,
    pub state: NodeState,
    pub success: bool,
    /// Unix milliseconds; zero when the node never started.
    pub start_ms: u64,
    pub end_ms: u64,
    pub was_cached: bool,
    /// The node's fingerprint over kind, settings and upstream lineage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Short human-readable message plus an error kind tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_cause: Option<SkipCause>,
    /// The ultimately failing node this skip traces back to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caused_by: Option<NodeId>,
}

impl NodeRunResult {
    pub fn skipped(
        node_id: NodeId,
        kind: &str,
        cause: SkipCause,
        caused_by: Option<NodeId>,
    ) -> Self {
        let error = caused_by.map(|source| match cause {
            SkipCause::UpstreamFailed => format!("skipped: upstream node {source} failed"),
            _ => format!("skipped: upstream node {source}"),
        });
        Self {
            node_id,
            kind: kind.to_string(),
            state: NodeState::Skipped,
            success: false,
            start_ms: 0,
            end_ms: 0,
            was_cached: false,
            upstream_hash: None,
            row_count: None,
            error,
            error_kind: None,
            skip_cause: Some(cause),
            caused_by,
        }
    }
}

/// Aggregate summary of one run. Every node in the plan appears exactly
/// once in `node_results`, whatever its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInformation {
    pub flow_id: FlowId,
    pub success: bool,
    pub cancelled: bool,
    pub nodes_completed: usize,
    pub start_ms: u64,
    pub end_ms: u64,
    pub node_results: Vec<NodeRunResult>,
}

impl RunInformation {
    pub fn result_for(&self, node_id: NodeId) -> Option<&NodeRunResult> {
        self.node_results.iter().find(|r| r.node_id == node_id)
    }
}

pub(crate) fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
