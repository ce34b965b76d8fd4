// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Integration tests for the worker client against an in-process fake
//! worker speaking the real frame sequence.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use base64::Engine as _;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;
use crate::worker::{
    Operation, TaskMeta, TaskState, TaskStatus, WorkerClient, WorkerResult,
};

#[derive(Default)]
struct FakeWorkerState {
    /// Connection attempts per task id.
    attempts: HashMap<String, usize>,
    /// Tasks that finished after their socket dropped.
    completed: HashMap<String, Vec<u8>>,
}

type Shared = Arc<Mutex<FakeWorkerState>>;

async fn spawn_fake_worker() -> (String, Shared) {
    let state: Shared = Arc::new(Mutex::new(FakeWorkerState::default()));
    let app = Router::new()
        .route("/ws/submit", get(ws_handler))
        .route("/submit_query/", axum::routing::post(submit_query_handler))
        .route("/status/{task_id}", get(status_handler))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Shared>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, value: serde_json::Value) {
    let _ = socket.send(WsMessage::Text(value.to_string().into())).await;
}

async fn handle_socket(mut socket: WebSocket, state: Shared) {
    // First frame is always the JSON metadata.
    let meta: TaskMeta = match socket.recv().await {
        Some(Ok(WsMessage::Text(text))) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected metadata frame, got {other:?}"),
    };

    // Then one binary frame per plan.
    let mut plans = Vec::new();
    for _ in 0..meta.operation.plan_frames() {
        match socket.recv().await {
            Some(Ok(WsMessage::Binary(bytes))) => plans.push(bytes.to_vec()),
            other => panic!("expected plan frame, got {other:?}"),
        }
    }

    let behavior = meta
        .kwargs
        .get("behavior")
        .and_then(|v| v.as_str())
        .unwrap_or("store")
        .to_string();
    let attempt = {
        let mut guard = state.lock().await;
        let entry = guard.attempts.entry(meta.task_id.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    match behavior.as_str() {
        "store" => {
            send_json(&mut socket, serde_json::json!({"type": "progress", "progress": 50})).await;
            send_json(
                &mut socket,
                serde_json::json!({
                    "type": "complete",
                    "result_type": "polars",
                    "file_ref": format!("/cache/{}/{}.arrow", meta.flow_id, meta.task_id),
                    "has_result": true
                }),
            )
            .await;
            // Echo the plan back as the "serialised scan".
            let _ = socket.send(WsMessage::Binary(plans[0].clone().into())).await;
        }
        "count" => {
            send_json(
                &mut socket,
                serde_json::json!({
                    "type": "complete",
                    "result_type": "other",
                    "file_ref": "",
                    "has_result": true
                }),
            )
            .await;
            send_json(&mut socket, serde_json::json!({"type": "result_data", "data": 1234}))
                .await;
        }
        "fail" => {
            send_json(
                &mut socket,
                serde_json::json!({"type": "error", "error_message": "ColumnNotFound: b"}),
            )
            .await;
        }
        "capacity_then_store" => {
            if attempt == 1 {
                send_json(
                    &mut socket,
                    serde_json::json!({"type": "error", "error_message": "worker at capacity (4/4)"}),
                )
                .await;
            } else {
                send_json(
                    &mut socket,
                    serde_json::json!({
                        "type": "complete",
                        "result_type": "polars",
                        "file_ref": "/cache/f.arrow",
                        "has_result": true
                    }),
                )
                .await;
                let _ = socket.send(WsMessage::Binary(plans[0].clone().into())).await;
            }
        }
        "drop_then_complete" => {
            // Simulate a client disconnect mid-task: close the socket
            // without a terminal frame, finish the work in the background
            // and publish it through the status endpoint.
            let task_id = meta.task_id.clone();
            let result = plans[0].clone();
            {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                    state.lock().await.completed.insert(task_id, result);
                });
            }
            let _ = socket.send(WsMessage::Close(None)).await;
        }
        other => panic!("unknown behavior {other}"),
    }
}

async fn submit_query_handler(
    State(state): State<Shared>,
    axum::Json(body): axum::Json<crate::worker::SubmitQuery>,
) -> axum::Json<TaskStatus> {
    // Accept, "materialise" in the background, surface via /status.
    let plan = base64::engine::general_purpose::STANDARD
        .decode(&body.operation)
        .unwrap_or_default();
    let task_id = body.task_id.clone();
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            state.lock().await.completed.insert(task_id, plan);
        });
    }
    axum::Json(TaskStatus {
        status: TaskState::Starting,
        progress: Some(0),
        results: None,
        result_type: None,
        error_message: None,
        file_ref: None,
    })
}

async fn status_handler(
    Path(task_id): Path<String>,
    State(state): State<Shared>,
) -> Json<TaskStatus> {
    let guard = state.lock().await;
    match guard.completed.get(&task_id) {
        Some(bytes) => Json(TaskStatus {
            status: TaskState::Completed,
            progress: Some(100),
            results: Some(base64::engine::general_purpose::STANDARD.encode(bytes)),
            result_type: Some(crate::worker::ResultType::Polars),
            error_message: None,
            file_ref: Some(format!("/cache/1/{task_id}.arrow")),
        }),
        None => Json(TaskStatus {
            status: TaskState::Processing,
            progress: Some(10),
            results: None,
            result_type: None,
            error_message: None,
            file_ref: None,
        }),
    }
}

fn meta(task_id: &str, operation: Operation, behavior: &str) -> TaskMeta {
    TaskMeta {
        task_id: task_id.to_string(),
        operation,
        flow_id: 1,
        node_id: 2,
        kwargs: serde_json::json!({"behavior": behavior}),
    }
}

#[tokio::test]
async fn store_round_trip_with_progress() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();
    let mut progress_seen = Vec::new();

    let result = client
        .submit(
            &meta("store-1", Operation::Store, "store"),
            &[b"plan-bytes".to_vec()],
            &cancel,
            &mut |p| progress_seen.push(p),
        )
        .await
        .unwrap();

    match result {
        WorkerResult::Plan { bytes, file_ref } => {
            assert_eq!(bytes, b"plan-bytes");
            assert_eq!(file_ref, "/cache/1/store-1.arrow");
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(progress_seen, vec![50]);
}

#[tokio::test]
async fn non_plan_results_arrive_as_json() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();

    let result = client
        .submit(
            &meta("count-1", Operation::CalculateNumberOfRecords, "count"),
            &[b"plan".to_vec()],
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap();

    match result {
        WorkerResult::Data(value) => assert_eq!(value, serde_json::json!(1234)),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn worker_error_surfaces_as_task_failure() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();

    let err = client
        .submit(
            &meta("fail-1", Operation::Store, "fail"),
            &[b"plan".to_vec()],
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap_err();

    match err {
        ExecutionError::WorkerTaskFailed { task_id, message } => {
            assert_eq!(task_id, "fail-1");
            assert!(message.contains("ColumnNotFound"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn capacity_refusal_retried_once() {
    let (url, state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();

    let result = client
        .submit(
            &meta("cap-1", Operation::Store, "capacity_then_store"),
            &[b"plan".to_vec()],
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap();

    assert!(matches!(result, WorkerResult::Plan { .. }));
    assert_eq!(state.lock().await.attempts["cap-1"], 2);
}

#[tokio::test]
async fn disconnect_recovers_via_status_endpoint() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();

    // The socket dies before the terminal frame; the worker finishes in
    // the background and the client must pick the result up over REST.
    let result = client
        .submit(
            &meta("drop-1", Operation::Store, "drop_then_complete"),
            &[b"recovered-plan".to_vec()],
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap();

    match result {
        WorkerResult::Plan { bytes, file_ref } => {
            assert_eq!(bytes, b"recovered-plan");
            assert_eq!(file_ref, "/cache/1/drop-1.arrow");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn rest_fallback_submits_and_polls_to_completion() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();

    let result = client
        .submit_rest(
            &meta("rest-1", Operation::Store, "store"),
            b"rest-plan",
            &cancel,
        )
        .await
        .unwrap();

    match result {
        WorkerResult::Plan { bytes, .. } => assert_eq!(bytes, b"rest-plan"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn cancellation_interrupts_submission() {
    let (url, _state) = spawn_fake_worker().await;
    let client = WorkerClient::new(url);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = client
        .submit(
            &meta("cancel-1", Operation::Store, "store"),
            &[b"plan".to_vec()],
            &cancel,
            &mut |_| {},
        )
        .await
        .unwrap_err();
    assert!(err.is_cancelled() || matches!(err, ExecutionError::WorkerDisconnect { .. }));
}
