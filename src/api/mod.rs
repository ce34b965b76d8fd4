// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Control-plane HTTP surface.
//!
//! The routes mirror what external callers depend on: start a run (202
//! while running, 200 once finished), poll run status, cancel, inspect
//! node-level data and import flow files. The service state owns the
//! registry plus one runner (and result cache) per flow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::error;

use crate::cache::ResultCache;
use crate::config::EngineConfig;
use crate::engine::{FlowRunner, ProgressSink, RunInformation, TransformRegistry};
use crate::flowfile::load_flow_file;
use crate::graph::{FlowId, NodeId};
use crate::kernel::KernelCoordinator;
use crate::registry::FlowRegistry;
use crate::worker::WorkerClient;

/// Shared service state behind every route.
pub struct AppState {
    config: EngineConfig,
    transforms: Arc<TransformRegistry>,
    worker: Option<Arc<WorkerClient>>,
    kernels: Option<Arc<KernelCoordinator>>,
    registry: Mutex<FlowRegistry>,
    runners: Mutex<HashMap<FlowId, Arc<FlowRunner>>>,
}

impl AppState {
    pub fn new(config: EngineConfig, transforms: Arc<TransformRegistry>) -> Self {
        let worker = config
            .worker_url
            .as_ref()
            .map(|url| Arc::new(WorkerClient::new(url.clone())));
        Self {
            config,
            transforms,
            worker,
            kernels: None,
            registry: Mutex::new(FlowRegistry::new()),
            runners: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_kernels(mut self, kernels: Arc<KernelCoordinator>) -> Self {
        self.kernels = Some(kernels);
        self
    }

    pub fn registry(&self) -> &Mutex<FlowRegistry> {
        &self.registry
    }

    /// One runner per flow; the in-memory plan cache lives as long as
    /// the runner does, so reruns hit it.
    async fn runner_for(&self, flow_id: FlowId) -> Arc<FlowRunner> {
        let mut runners = self.runners.lock().await;
        runners
            .entry(flow_id)
            .or_insert_with(|| {
                let cache = Arc::new(ResultCache::new(self.config.cache_dir.clone(), flow_id));
                let mut runner = FlowRunner::new(cache, Arc::clone(&self.transforms));
                if let Some(worker) = &self.worker {
                    runner = runner.with_worker(Arc::clone(worker));
                }
                if let Some(kernels) = &self.kernels {
                    runner = runner.with_kernels(Arc::clone(kernels));
                }
                Arc::new(runner)
            })
            .clone()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/flow/run/", post(run_flow))
        .route("/flow/run_status/", get(run_status))
        .route("/flow/cancel/", post(cancel_flow))
        .route("/flow_data/v2", get(flow_data))
        .route("/import_flow/", get(import_flow))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct FlowQuery {
    flow_id: FlowId,
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    flow_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

fn not_found(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Summary body served while a run has not finished yet.
fn running_body(flow_id: FlowId) -> RunInformation {
    RunInformation {
        flow_id,
        success: false,
        cancelled: false,
        nodes_completed: 0,
        start_ms: 0,
        end_ms: 0,
        node_results: vec![],
    }
}

async fn run_flow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    let flow_id = query.flow_id;
    let (snapshot, token) = {
        let mut registry = state.registry.lock().await;
        if registry.flow(flow_id).is_none() {
            return not_found(format!("flow {flow_id} not found"));
        }
        match registry.begin_run(flow_id) {
            Ok(run) => run,
            // Already running: report 202 with the in-progress shape.
            Err(_) => {
                return (StatusCode::ACCEPTED, Json(running_body(flow_id))).into_response()
            }
        }
    };

    let runner = state.runner_for(flow_id).await;
    let state_for_task = Arc::clone(&state);
    tokio::spawn(async move {
        let mut snapshot = snapshot;
        let outcome = runner
            .run(&mut snapshot, &[], token, ProgressSink::disabled())
            .await;
        let mut registry = state_for_task.registry.lock().await;
        match outcome {
            Ok(info) => registry.finish_run(flow_id, snapshot, info),
            Err(err) => {
                error!(flow_id, error = %err, "run aborted at planning");
                let mut info = running_body(flow_id);
                info.success = false;
                registry.finish_run(flow_id, snapshot, info);
            }
        }
    });

    (StatusCode::ACCEPTED, Json(running_body(flow_id))).into_response()
}

async fn run_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    let registry = state.registry.lock().await;
    let Some(flow) = registry.flow(query.flow_id) else {
        return not_found(format!("flow {} not found", query.flow_id));
    };
    if flow.is_running() {
        return (StatusCode::ACCEPTED, Json(running_body(query.flow_id))).into_response();
    }
    match &flow.last_run {
        Some(info) => (StatusCode::OK, Json(info.clone())).into_response(),
        None => (StatusCode::OK, Json(running_body(query.flow_id))).into_response(),
    }
}

async fn cancel_flow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    let mut registry = state.registry.lock().await;
    if registry.flow(query.flow_id).is_none() {
        return not_found(format!("flow {} not found", query.flow_id));
    }
    let was_running = registry.cancel_run(query.flow_id);
    (
        StatusCode::OK,
        Json(serde_json::json!({"flow_id": query.flow_id, "cancelled": was_running})),
    )
        .into_response()
}

#[derive(Debug, Serialize)]
struct NodeData {
    node_id: NodeId,
    #[serde(rename = "type")]
    kind: String,
    is_correct: bool,
    state: crate::graph::NodeState,
    description: String,
    x_position: f64,
    y_position: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    fingerprint: Option<String>,
    setting_input: serde_json::Value,
    input_ids: Vec<NodeId>,
    outputs: Vec<NodeId>,
}

async fn flow_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowQuery>,
) -> Response {
    let registry = state.registry.lock().await;
    let Some(flow) = registry.flow(query.flow_id) else {
        return not_found(format!("flow {} not found", query.flow_id));
    };
    let graph = &flow.graph;
    let nodes: Vec<NodeData> = graph
        .node_ids()
        .into_iter()
        .map(|node_id| {
            let node = graph.node(node_id).expect("listed id");
            NodeData {
                node_id,
                kind: node.kind.as_str().to_string(),
                is_correct: node.is_correct,
                state: node.state,
                description: node.description.clone(),
                x_position: node.position_x,
                y_position: node.position_y,
                fingerprint: node.fingerprint.map(|fp| fp.to_hex()),
                setting_input: node
                    .settings
                    .as_ref()
                    .map(|s| s.to_value())
                    .unwrap_or(serde_json::Value::Null),
                input_ids: graph
                    .predecessors(node_id)
                    .into_iter()
                    .map(|(id, _)| id)
                    .collect(),
                outputs: graph.successors(node_id),
            }
        })
        .collect();

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "flow_id": query.flow_id,
            "flow_name": graph.name(),
            "settings": graph.settings(),
            "nodes": nodes,
        })),
    )
        .into_response()
}

async fn import_flow(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ImportQuery>,
) -> Response {
    match load_flow_file(&query.flow_path) {
        Ok(graph) => {
            let mut registry = state.registry.lock().await;
            let flow_id = registry.register(graph);
            (
                StatusCode::OK,
                Json(serde_json::json!({"flow_id": flow_id})),
            )
                .into_response()
        }
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError {
                error: err.to_string(),
            }),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stubs::stub_registry;

    async fn spawn_app() -> (String, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            cache_dir: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        // Leak the tempdir so the cache outlives the test server.
        std::mem::forget(dir);

        let state = Arc::new(AppState::new(config, Arc::new(stub_registry())));
        let app = router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), state)
    }

    fn sample_flow_path() -> PathBuf {
        let dir = std::env::temp_dir().join("flowfile-core-api-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("api-sample.yaml");
        std::fs::write(
            &path,
            r#"
flowfile_version: "2.0"
flowfile_id: 0
flowfile_name: api-sample
nodes:
  - id: 1
    type: manual_input
    setting_input:
      data: [{a: 1}, {a: 2}]
  - id: 2
    type: filter
    input_ids: [1]
    setting_input:
      predicate: "a > 1"
"#,
        )
        .unwrap();
        path
    }

    #[tokio::test]
    async fn import_run_and_poll_status() {
        let (base, _state) = spawn_app().await;
        let http = reqwest::Client::new();

        let imported: serde_json::Value = http
            .get(format!("{base}/import_flow/"))
            .query(&[("flow_path", sample_flow_path().to_str().unwrap())])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let flow_id = imported["flow_id"].as_i64().unwrap();

        let response = http
            .post(format!("{base}/flow/run/?flow_id={flow_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        // Poll until the run finishes.
        let mut finished = None;
        for _ in 0..100 {
            let response = http
                .get(format!("{base}/flow/run_status/?flow_id={flow_id}"))
                .send()
                .await
                .unwrap();
            if response.status() == reqwest::StatusCode::OK {
                let info: RunInformation = response.json().await.unwrap();
                if !info.node_results.is_empty() {
                    finished = Some(info);
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let info = finished.expect("run never finished");
        assert!(info.success);
        assert_eq!(info.nodes_completed, 2);
    }

    #[tokio::test]
    async fn flow_data_exposes_node_level_view() {
        let (base, _state) = spawn_app().await;
        let http = reqwest::Client::new();

        let imported: serde_json::Value = http
            .get(format!("{base}/import_flow/"))
            .query(&[("flow_path", sample_flow_path().to_str().unwrap())])
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let flow_id = imported["flow_id"].as_i64().unwrap();

        let data: serde_json::Value = http
            .get(format!("{base}/flow_data/v2?flow_id={flow_id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(data["flow_name"], "api-sample");
        let nodes = data["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0]["type"], "manual_input");
        assert_eq!(nodes[1]["input_ids"][0], 1);
        assert!(nodes[1]["is_correct"].as_bool().unwrap());
    }

    #[tokio::test]
    async fn unknown_flow_is_404() {
        let (base, _state) = spawn_app().await;
        let http = reqwest::Client::new();
        let response = http
            .get(format!("{base}/flow/run_status/?flow_id=404"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn import_rejects_bad_files() {
        let (base, _state) = spawn_app().await;
        let http = reqwest::Client::new();
        let response = http
            .get(format!("{base}/import_flow/"))
            .query(&[("flow_path", "/nonexistent/flow.yaml")])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::UNPROCESSABLE_ENTITY);
    }
}
