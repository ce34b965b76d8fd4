// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel coordination: container lifecycle, artifact registry and
//! node-to-kernel routing.
//!
//! A kernel is a sandboxed Python runtime (usually a container) that
//! executes `python_script` nodes and owns an artifact store. The
//! coordinator routes executions to the right kernel, maintains the
//! metadata-only artifact registry, clears a node's own artifacts before
//! re-execution, and restarts an unhealthy kernel once when auto-restart
//! is enabled.

mod artifacts;
mod client;
mod lifecycle;


pub use artifacts::{ArtifactContext, ArtifactMeta, ArtifactRef, NodeArtifactState};
pub use client::{
    ArtifactPersistence, CleanupRequest, CleanupResponse, ExecuteRequest, ExecuteResponse,
    HealthResponse, KernelClient, PersistenceInfo, RecoveryStatus,
};
pub use lifecycle::{
    wait_healthy, ContainerHandle, DockerKernelLauncher, KernelLauncher, KernelSpec,
    KernelState,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::errors::ExecutionError;
use crate::graph::NodeId;
use crate::observability::messages::{kernel as kernel_messages, StructuredLog};

/// One `python_script` execution, as routed by the scheduler.
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub node_id: NodeId,
    pub kernel_id: String,
    pub code: String,
    pub input_paths: Vec<String>,
    pub output_dir: String,
    /// Transitive ancestors of the node; availability is computed from
    /// the subset that ran on the same kernel.
    pub ancestors: Vec<NodeId>,
    pub timeout: Option<Duration>,
}

/// What a successful script execution produced.
#[derive(Debug, Clone)]
pub struct ScriptOutcome {
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub output_paths: Vec<String>,
    pub published: Vec<ArtifactRef>,
}

struct KernelEntry {
    client: KernelClient,
    state: KernelState,
    container: Option<ContainerHandle>,
    spec: Option<KernelSpec>,
}

/// Routes script executions to kernels and owns the artifact registry.
pub struct KernelCoordinator {
    kernels: Mutex<HashMap<String, KernelEntry>>,
    artifacts: Mutex<ArtifactContext>,
    launcher: Option<Arc<dyn KernelLauncher>>,
    shared_volume: PathBuf,
    default_image: String,
    auto_restart: bool,
}

impl KernelCoordinator {
    pub fn new(shared_volume: impl Into<PathBuf>) -> Self {
        Self {
            kernels: Mutex::new(HashMap::new()),
            artifacts: Mutex::new(ArtifactContext::new()),
            launcher: None,
            shared_volume: shared_volume.into(),
            default_image: "flowfile-kernel:latest".to_string(),
            auto_restart: true,
        }
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn KernelLauncher>, image: String) -> Self {
        self.launcher = Some(launcher);
        self.default_image = image;
        self
    }

    pub fn auto_restart(mut self, enabled: bool) -> Self {
        self.auto_restart = enabled;
        self
    }

    /// Register an externally managed kernel (remote process, test
    /// server) by endpoint.
    pub async fn register_kernel(&self, kernel_id: &str, base_url: &str) {
        let mut kernels = self.kernels.lock().await;
        kernels.insert(
            kernel_id.to_string(),
            KernelEntry {
                client: KernelClient::new(kernel_id, base_url),
                state: KernelState::Idle,
                container: None,
                spec: None,
            },
        );
    }

    /// Launch a container-backed kernel and wait for it to become
    /// healthy.
    pub async fn provision(&self, kernel_id: &str) -> Result<(), ExecutionError> {
        let launcher = self.launcher.as_ref().ok_or_else(|| {
            ExecutionError::KernelUnhealthy {
                kernel_id: kernel_id.to_string(),
                message: "no kernel launcher configured".into(),
            }
        })?;
        let spec = KernelSpec {
            kernel_id: kernel_id.to_string(),
            image: self.default_image.clone(),
            shared_volume: self.shared_volume.clone(),
            persistence_enabled: true,
            recovery_mode: "lazy".to_string(),
            owner_user_id: None,
        };
        let handle = launcher.launch(&spec).await?;
        let mut kernels = self.kernels.lock().await;
        kernels.insert(
            kernel_id.to_string(),
            KernelEntry {
                client: KernelClient::new(kernel_id, &handle.base_url),
                state: KernelState::Idle,
                container: Some(handle),
                spec: Some(spec),
            },
        );
        Ok(())
    }

    /// Execute a `python_script` node on its kernel.
    ///
    /// Before running, the node's previously published artifacts are
    /// cleared (re-execution touches only its own artifacts) and the
    /// availability set is computed from same-kernel ancestors. On a
    /// transport failure the kernel is restarted once when auto-restart
    /// is on and a launcher is available.
    pub async fn execute_script(
        &self,
        request: &ScriptRequest,
        cancel: &CancellationToken,
    ) -> Result<ScriptOutcome, ExecutionError> {
        let client = self.client_for(&request.kernel_id).await?;

        let (available, cleared) = {
            let mut artifacts = self.artifacts.lock().await;
            let cleared = artifacts.clear_node_published(request.node_id);
            let available = artifacts.compute_available(
                request.node_id,
                &request.kernel_id,
                &request.ancestors,
            );
            (available, cleared)
        };
        if !cleared.is_empty() {
            // Best effort: the kernel drops the stale objects too.
            let cleanup = CleanupRequest {
                max_age_hours: None,
                artifact_names: Some(cleared),
            };
            if let Err(err) = client.cleanup(&cleanup).await {
                warn!(kernel_id = %request.kernel_id, error = %err, "stale artifact cleanup failed");
            }
        }

        let execute_request = ExecuteRequest {
            node_id: request.node_id,
            code: request.code.clone(),
            input_paths: request.input_paths.clone(),
            output_dir: request.output_dir.clone(),
            available_artifacts: {
                let mut names: Vec<String> = available.keys().cloned().collect();
                names.sort();
                names
            },
        };

        self.mark_state(&request.kernel_id, KernelState::Busy).await;
        let result = self
            .execute_with_restart(&client, request, &execute_request, cancel)
            .await;
        self.mark_state(
            &request.kernel_id,
            if result.is_ok() {
                KernelState::Idle
            } else {
                KernelState::Failed
            },
        )
        .await;
        let response = result?;

        if !response.success {
            return Err(ExecutionError::KernelScriptFailed {
                node_id: request.node_id,
                message: response
                    .error
                    .unwrap_or_else(|| "script failed without an error message".into()),
            });
        }

        let published = {
            let mut artifacts = self.artifacts.lock().await;
            artifacts.record_deleted(
                request.node_id,
                &request.kernel_id,
                &response.artifacts_deleted,
            );
            artifacts.record_published(
                request.node_id,
                &request.kernel_id,
                &response.artifacts_published,
                &response.artifacts_deleted,
            )?
        };

        Ok(ScriptOutcome {
            stdout: response.stdout,
            stderr: response.stderr,
            execution_time_ms: response.execution_time_ms,
            output_paths: response.output_paths,
            published,
        })
    }

    async fn execute_with_restart(
        &self,
        client: &KernelClient,
        request: &ScriptRequest,
        execute_request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse, ExecutionError> {
        match client.execute(execute_request, request.timeout, cancel).await {
            Err(ExecutionError::KernelUnhealthy { kernel_id, message })
                if self.auto_restart && self.launcher.is_some() =>
            {
                kernel_messages::KernelRestarting {
                    kernel_id: &kernel_id,
                    reason: &message,
                }
                .log();
                self.restart(&kernel_id).await?;
                let client = self.client_for(&kernel_id).await?;
                client.execute(execute_request, request.timeout, cancel).await
            }
            other => other,
        }
    }

    async fn restart(&self, kernel_id: &str) -> Result<(), ExecutionError> {
        let launcher = self.launcher.as_ref().expect("caller checked launcher");
        let (old_container, spec) = {
            let mut kernels = self.kernels.lock().await;
            let entry =
                kernels
                    .get_mut(kernel_id)
                    .ok_or_else(|| ExecutionError::KernelUnhealthy {
                        kernel_id: kernel_id.to_string(),
                        message: "unknown kernel".into(),
                    })?;
            entry.state = KernelState::Starting;
            (entry.container.take(), entry.spec.clone())
        };
        if let Some(container) = old_container {
            let _ = launcher.terminate(&container).await;
        }
        let spec = spec.ok_or_else(|| ExecutionError::KernelUnhealthy {
            kernel_id: kernel_id.to_string(),
            message: "kernel was registered externally; cannot restart it".into(),
        })?;
        let handle = launcher.launch(&spec).await?;
        let mut kernels = self.kernels.lock().await;
        if let Some(entry) = kernels.get_mut(kernel_id) {
            entry.client = KernelClient::new(kernel_id, &handle.base_url);
            entry.container = Some(handle);
            entry.state = KernelState::Idle;
        }
        info!(%kernel_id, "kernel restarted");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Artifact registry access
    // ------------------------------------------------------------------

    pub async fn published_by_node(&self, node_id: NodeId) -> Vec<ArtifactRef> {
        self.artifacts.lock().await.published_by_node(node_id)
    }

    pub async fn available_for_node(&self, node_id: NodeId) -> HashMap<String, ArtifactRef> {
        self.artifacts.lock().await.available_for_node(node_id)
    }

    pub async fn kernel_artifacts(&self, kernel_id: &str) -> HashMap<String, ArtifactRef> {
        self.artifacts.lock().await.kernel_artifacts(kernel_id)
    }

    // ------------------------------------------------------------------
    // Persistence proxies
    // ------------------------------------------------------------------

    pub async fn recover_artifacts(
        &self,
        kernel_id: &str,
    ) -> Result<RecoveryStatus, ExecutionError> {
        self.client_for(kernel_id).await?.recover().await
    }

    pub async fn cleanup_artifacts(
        &self,
        kernel_id: &str,
        request: &CleanupRequest,
    ) -> Result<CleanupResponse, ExecutionError> {
        self.client_for(kernel_id).await?.cleanup(request).await
    }

    pub async fn persistence_info(
        &self,
        kernel_id: &str,
    ) -> Result<PersistenceInfo, ExecutionError> {
        self.client_for(kernel_id).await?.persistence().await
    }

    /// Wipe a kernel's store and forget its artifacts.
    pub async fn clear_kernel(&self, kernel_id: &str) -> Result<(), ExecutionError> {
        let client = self.client_for(kernel_id).await?;
        client.clear().await?;
        self.artifacts.lock().await.clear_kernel(kernel_id);
        Ok(())
    }

    /// Tear down every container-backed kernel.
    pub async fn stop_all(&self) {
        let launcher = match &self.launcher {
            Some(launcher) => Arc::clone(launcher),
            None => return,
        };
        let mut kernels = self.kernels.lock().await;
        for (kernel_id, entry) in kernels.iter_mut() {
            if let Some(container) = entry.container.take() {
                if let Err(err) = launcher.terminate(&container).await {
                    warn!(%kernel_id, error = %err, "kernel teardown failed");
                }
            }
            entry.state = KernelState::Stopped;
        }
    }

    pub async fn kernel_state(&self, kernel_id: &str) -> Option<KernelState> {
        self.kernels.lock().await.get(kernel_id).map(|e| e.state)
    }

    async fn client_for(&self, kernel_id: &str) -> Result<KernelClient, ExecutionError> {
        let kernels = self.kernels.lock().await;
        kernels
            .get(kernel_id)
            .map(|entry| entry.client.clone())
            .ok_or_else(|| ExecutionError::KernelUnhealthy {
                kernel_id: kernel_id.to_string(),
                message: "unknown kernel".into(),
            })
    }

    async fn mark_state(&self, kernel_id: &str, state: KernelState) {
        if let Some(entry) = self.kernels.lock().await.get_mut(kernel_id) {
            entry.state = state;
        }
    }
}
