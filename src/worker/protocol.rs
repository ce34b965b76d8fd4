// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Wire types for the worker protocol.
//!
//! Frame sequence per task: one JSON metadata frame, one binary frame per
//! plan (two for fuzzy match), zero or more coalesced progress frames,
//! then exactly one terminal frame. Result bytes travel as raw binary on
//! the WebSocket; only the REST fallback base64-encodes them for JSON
//! transport.

use serde::{Deserialize, Serialize};

use crate::fingerprint::Digest;
use crate::graph::{FlowId, NodeId};

/// Operations the worker performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Materialise a plan to `{cache}/{flow_id}/{task_id}.arrow` and
    /// reply with a serialised scan of that file.
    Store,
    /// Same as store, limited to a sample of rows (`kwargs.sample_size`).
    StoreSample,
    /// Column statistics for a plan.
    CalculateSchema,
    /// Row count for a plan.
    CalculateNumberOfRecords,
    /// Fuzzy join over two plans (`kwargs.fuzzy_maps`).
    FuzzyMatch,
    /// Build a table from raw received data (`kwargs` carries the table
    /// description).
    CreateTable,
    /// Write a plan to a local path or cloud storage; completion only,
    /// no binary payload.
    WriteOutput,
}

impl Operation {
    /// Number of binary plan frames that follow the metadata frame.
    pub fn plan_frames(&self) -> usize {
        match self {
            Operation::FuzzyMatch => 2,
            Operation::CreateTable => 0,
            _ => 1,
        }
    }
}

/// JSON metadata frame opening every task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMeta {
    pub task_id: String,
    pub operation: Operation,
    pub flow_id: FlowId,
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub kwargs: serde_json::Value,
}

/// Task ids are derived from the node fingerprint so a retried submission
/// lands on the same worker-side status slot (idempotency across
/// reconnects).
pub fn task_id_for(fingerprint: &Digest, operation: Operation) -> String {
    let op = match operation {
        Operation::Store => "store",
        Operation::StoreSample => "sample",
        Operation::CalculateSchema => "schema",
        Operation::CalculateNumberOfRecords => "count",
        Operation::FuzzyMatch => "fuzzy",
        Operation::CreateTable => "create",
        Operation::WriteOutput => "write",
    };
    format!("{op}-{fingerprint}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultType {
    Polars,
    Other,
}

/// Frames the worker sends back over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// Coalesced progress, 0..=100.
    Progress { progress: u8 },
    /// Terminal success. When `result_type == polars && has_result`, one
    /// binary frame with the serialised lazy result follows; for other
    /// result types a `result_data` frame follows instead.
    Complete {
        result_type: ResultType,
        file_ref: String,
        has_result: bool,
    },
    /// JSON result payload for non-plan results (schemas, counts).
    ResultData { data: serde_json::Value },
    /// Terminal failure.
    Error { error_message: String },
}

/// Frames the client sends after the opening sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Cooperative cancellation of an in-flight task; the worker
    /// terminates the child process after a grace period.
    Cancel { task_id: String },
}

/// Completed result of a worker task, whichever transport delivered it.
#[derive(Debug, Clone)]
pub enum WorkerResult {
    /// Serialised lazy result plus the worker-side file reference.
    Plan { bytes: Vec<u8>, file_ref: String },
    /// JSON payload (schema, record counts).
    Data(serde_json::Value),
    /// Completion with no result payload (write_output).
    Done { file_ref: String },
}

/// Lifecycle states reported by `GET /status/{task_id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Starting,
    Processing,
    Completed,
    Error,
    Cancelled,
    #[serde(rename = "Unknown Error")]
    UnknownError,
}

/// REST fallback submission body (`POST /submit_query/`); the plan
/// crosses as base64 because this transport is plain JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQuery {
    pub task_id: String,
    /// Base64-encoded serialised plan.
    pub operation: String,
    pub operation_type: Operation,
    pub flow_id: FlowId,
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub kwargs: serde_json::Value,
}

/// REST status body; `results` is base64 on this transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: TaskState,
    #[serde(default)]
    pub progress: Option<i32>,
    #[serde(default)]
    pub results: Option<String>,
    #[serde(default)]
    pub result_type: Option<ResultType>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub file_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_frame_shape() {
        let meta = TaskMeta {
            task_id: "store-abc".into(),
            operation: Operation::Store,
            flow_id: 1,
            node_id: 2,
            kwargs: serde_json::Value::Null,
        };
        let value = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            value,
            json!({"task_id": "store-abc", "operation": "store", "flow_id": 1, "node_id": 2})
        );
    }

    #[test]
    fn frames_tag_on_type() {
        let frame: WorkerFrame =
            serde_json::from_value(json!({"type": "progress", "progress": 42})).unwrap();
        assert!(matches!(frame, WorkerFrame::Progress { progress: 42 }));

        let frame: WorkerFrame = serde_json::from_value(json!({
            "type": "complete",
            "result_type": "polars",
            "file_ref": "/cache/1/store-abc.arrow",
            "has_result": true
        }))
        .unwrap();
        assert!(matches!(
            frame,
            WorkerFrame::Complete { result_type: ResultType::Polars, has_result: true, .. }
        ));

        let frame: WorkerFrame =
            serde_json::from_value(json!({"type": "error", "error_message": "boom"})).unwrap();
        assert!(matches!(frame, WorkerFrame::Error { .. }));
    }

    #[test]
    fn task_ids_are_deterministic_per_fingerprint_and_op() {
        let fp = Digest::of_bytes(b"node-lineage");
        assert_eq!(
            task_id_for(&fp, Operation::Store),
            task_id_for(&fp, Operation::Store)
        );
        assert_ne!(
            task_id_for(&fp, Operation::Store),
            task_id_for(&fp, Operation::CalculateSchema)
        );
    }

    #[test]
    fn fuzzy_match_carries_two_plans() {
        assert_eq!(Operation::FuzzyMatch.plan_frames(), 2);
        assert_eq!(Operation::Store.plan_frames(), 1);
        assert_eq!(Operation::CreateTable.plan_frames(), 0);
    }

    #[test]
    fn rest_status_parses_legacy_spellings() {
        let status: TaskStatus = serde_json::from_value(json!({
            "status": "Unknown Error",
            "progress": -1
        }))
        .unwrap();
        assert_eq!(status.status, TaskState::UnknownError);
    }
}
