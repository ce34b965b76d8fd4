// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Streaming client for the worker process.
//!
//! The primary transport is a WebSocket at `ws://{worker}/ws/submit`; if
//! the socket drops mid-task the worker keeps running the subprocess and
//! records the outcome, so the client falls back to polling the REST
//! status endpoint and recovers the result from there (at-least-once
//! completion, idempotent via the fingerprint-derived task id).

use std::time::Duration;

use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ExecutionError;
use crate::observability::messages::{worker as worker_messages, StructuredLog};

use super::protocol::{
    ClientFrame, ResultType, TaskMeta, TaskState, TaskStatus, WorkerFrame, WorkerResult,
};

/// How long a disconnected task is polled for before giving up.
const RECOVERY_DEADLINE: Duration = Duration::from_secs(300);
/// Poll interval against `GET /status/{task_id}`.
const RECOVERY_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Backoff before the single retry after `WorkerAtCapacity`.
const CAPACITY_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Client for one worker endpoint.
pub struct WorkerClient {
    base_url: String,
    http: reqwest::Client,
}

impl WorkerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            http: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn ws_submit_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/ws/submit")
    }

    /// Submit a task and wait for its terminal frame, retrying once after
    /// a short backoff when the worker reports it is at capacity.
    pub async fn submit(
        &self,
        meta: &TaskMeta,
        plans: &[Vec<u8>],
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<WorkerResult, ExecutionError> {
        match self.submit_once(meta, plans, cancel, on_progress).await {
            Err(ExecutionError::WorkerAtCapacity(_)) => {
                worker_messages::CapacityRetry {
                    task_id: &meta.task_id,
                }
                .log();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                    _ = tokio::time::sleep(CAPACITY_RETRY_BACKOFF) => {}
                }
                self.submit_once(meta, plans, cancel, on_progress).await
            }
            other => other,
        }
    }

    async fn submit_once(
        &self,
        meta: &TaskMeta,
        plans: &[Vec<u8>],
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<WorkerResult, ExecutionError> {
        if plans.len() != meta.operation.plan_frames() {
            return Err(ExecutionError::Internal(format!(
                "operation {:?} expects {} plan frame(s), got {}",
                meta.operation,
                meta.operation.plan_frames(),
                plans.len()
            )));
        }

        match self.submit_ws(meta, plans, cancel, on_progress).await {
            Err(ExecutionError::WorkerDisconnect { task_id, message }) => {
                worker_messages::TaskRecovering {
                    task_id: &task_id,
                    reason: &message,
                }
                .log();
                self.recover(&task_id, cancel).await
            }
            other => other,
        }
    }

    async fn submit_ws(
        &self,
        meta: &TaskMeta,
        plans: &[Vec<u8>],
        cancel: &CancellationToken,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<WorkerResult, ExecutionError> {
        let task_id = meta.task_id.clone();
        let disconnect = |message: String| ExecutionError::WorkerDisconnect {
            task_id: task_id.clone(),
            message,
        };

        let (mut ws, _) = connect_async(self.ws_submit_url())
            .await
            .map_err(|e| disconnect(e.to_string()))?;

        let meta_json = serde_json::to_string(meta)
            .map_err(|e| ExecutionError::Protocol(e.to_string()))?;
        ws.send(Message::Text(meta_json))
            .await
            .map_err(|e| disconnect(e.to_string()))?;
        for plan in plans {
            ws.send(Message::Binary(plan.clone()))
                .await
                .map_err(|e| disconnect(e.to_string()))?;
        }
        debug!(task_id = %meta.task_id, operation = ?meta.operation, "task submitted");

        // Set once a polars `complete` frame announces a binary payload.
        let mut awaiting_plan: Option<String> = None;

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => {
                    let frame = ClientFrame::Cancel { task_id: meta.task_id.clone() };
                    if let Ok(text) = serde_json::to_string(&frame) {
                        let _ = ws.send(Message::Text(text)).await;
                    }
                    let _ = ws.close(None).await;
                    return Err(ExecutionError::Cancelled);
                }
                message = ws.next() => message,
            };

            let message = message
                .ok_or_else(|| disconnect("stream ended before terminal frame".into()))?
                .map_err(|e| disconnect(e.to_string()))?;

            match message {
                Message::Text(text) => {
                    let frame: WorkerFrame = serde_json::from_str(&text)
                        .map_err(|e| ExecutionError::Protocol(format!("bad frame: {e}")))?;
                    match frame {
                        WorkerFrame::Progress { progress } => on_progress(progress.min(100)),
                        WorkerFrame::Complete {
                            result_type,
                            file_ref,
                            has_result,
                        } => {
                            if !has_result {
                                return Ok(WorkerResult::Done { file_ref });
                            }
                            match result_type {
                                ResultType::Polars => awaiting_plan = Some(file_ref),
                                // A result_data frame follows.
                                ResultType::Other => {}
                            }
                        }
                        WorkerFrame::ResultData { data } => {
                            return Ok(WorkerResult::Data(data));
                        }
                        WorkerFrame::Error { error_message } => {
                            return Err(classify_worker_error(&task_id, error_message));
                        }
                    }
                }
                Message::Binary(bytes) => match awaiting_plan.take() {
                    Some(file_ref) => {
                        return Ok(WorkerResult::Plan { bytes, file_ref });
                    }
                    None => {
                        return Err(ExecutionError::Protocol(
                            "unexpected binary frame before completion".into(),
                        ));
                    }
                },
                Message::Close(_) => {
                    return Err(disconnect("worker closed the stream".into()));
                }
                // Ping/pong handled by the transport.
                _ => {}
            }
        }
    }

    /// Submit over the REST fallback for environments where streaming is
    /// unavailable, then poll to completion. Terminal semantics match
    /// the WebSocket path; the plan and result bytes are base64 on this
    /// transport.
    pub async fn submit_rest(
        &self,
        meta: &TaskMeta,
        plan: &[u8],
        cancel: &CancellationToken,
    ) -> Result<WorkerResult, ExecutionError> {
        let body = super::protocol::SubmitQuery {
            task_id: meta.task_id.clone(),
            operation: base64::engine::general_purpose::STANDARD.encode(plan),
            operation_type: meta.operation,
            flow_id: meta.flow_id,
            node_id: meta.node_id,
            kwargs: meta.kwargs.clone(),
        };
        let response = self
            .http
            .post(format!("{}/submit_query/", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExecutionError::WorkerDisconnect {
                task_id: meta.task_id.clone(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(classify_worker_error(
                &meta.task_id,
                format!("submit_query returned {status}: {text}"),
            ));
        }
        self.recover(&meta.task_id, cancel).await
    }

    /// Fetch the worker-side status of a task.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus, ExecutionError> {
        let url = format!("{}/status/{task_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ExecutionError::WorkerDisconnect {
                task_id: task_id.to_string(),
                message: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(ExecutionError::Protocol(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<TaskStatus>()
            .await
            .map_err(|e| ExecutionError::Protocol(e.to_string()))
    }

    /// Poll the REST status endpoint until the task reaches a terminal
    /// state, then materialise the result from the base64 payload.
    pub async fn recover(
        &self,
        task_id: &str,
        cancel: &CancellationToken,
    ) -> Result<WorkerResult, ExecutionError> {
        let deadline = tokio::time::Instant::now() + RECOVERY_DEADLINE;
        loop {
            if cancel.is_cancelled() {
                return Err(ExecutionError::Cancelled);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ExecutionError::WorkerDisconnect {
                    task_id: task_id.to_string(),
                    message: "recovery deadline expired".into(),
                });
            }

            let status = self.task_status(task_id).await?;
            match status.status {
                TaskState::Completed => return decode_rest_result(task_id, status),
                TaskState::Error | TaskState::UnknownError => {
                    return Err(classify_worker_error(
                        task_id,
                        status
                            .error_message
                            .unwrap_or_else(|| "worker reported an error".into()),
                    ));
                }
                TaskState::Cancelled => return Err(ExecutionError::Cancelled),
                TaskState::Starting | TaskState::Processing => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
                        _ = tokio::time::sleep(RECOVERY_POLL_INTERVAL) => {}
                    }
                }
            }
        }
    }
}

/// Map a worker error message onto the taxonomy. Capacity refusals get
/// their own kind so the scheduler can apply the retry policy.
fn classify_worker_error(task_id: &str, message: String) -> ExecutionError {
    let lowered = message.to_lowercase();
    if lowered.contains("at capacity") || lowered.contains("workeratcapacity") {
        ExecutionError::WorkerAtCapacity(message)
    } else {
        ExecutionError::WorkerTaskFailed {
            task_id: task_id.to_string(),
            message,
        }
    }
}

fn decode_rest_result(
    task_id: &str,
    status: TaskStatus,
) -> Result<WorkerResult, ExecutionError> {
    let file_ref = status.file_ref.clone().unwrap_or_default();
    match (status.result_type, status.results) {
        (Some(ResultType::Polars), Some(encoded)) => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(encoded.trim())
                .map_err(|e| {
                    ExecutionError::Protocol(format!("bad base64 result for {task_id}: {e}"))
                })?;
            Ok(WorkerResult::Plan { bytes, file_ref })
        }
        (Some(ResultType::Other), Some(encoded)) => {
            let data = serde_json::from_str(&encoded)
                .unwrap_or(serde_json::Value::String(encoded));
            Ok(WorkerResult::Data(data))
        }
        _ => Ok(WorkerResult::Done { file_ref }),
    }
}
