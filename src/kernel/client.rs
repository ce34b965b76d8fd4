// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! HTTP client for a single kernel container.
//!
//! Kernels expose a small JSON API per container: script execution,
//! liveness, the artifact listing, and the persistence surface (recover,
//! cleanup, persistence info, clear). Transport failures map to
//! `KernelUnhealthy` so the coordinator can apply its restart policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::ExecutionError;
use crate::graph::NodeId;

use super::artifacts::ArtifactMeta;

/// Default timeout for the cheap control endpoints; `/execute` gets the
/// node's own deadline instead.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub node_id: NodeId,
    pub code: String,
    pub input_paths: Vec<String>,
    pub output_dir: String,
    /// Names the script may `read_artifact`; anything else fails inside
    /// the kernel.
    #[serde(default)]
    pub available_artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecuteResponse {
    pub success: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub execution_time_ms: u64,
    #[serde(default)]
    pub artifacts_published: Vec<ArtifactMeta>,
    #[serde(default)]
    pub artifacts_deleted: Vec<String>,
    #[serde(default)]
    pub output_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub artifact_count: usize,
    #[serde(default)]
    pub persistence_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStatus {
    pub status: String,
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub recovered: Vec<String>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CleanupRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_hours: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArtifactPersistence {
    pub persisted: bool,
    pub in_memory: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistenceInfo {
    pub enabled: bool,
    #[serde(default)]
    pub recovery_mode: String,
    #[serde(default)]
    pub persisted_count: usize,
    #[serde(default)]
    pub in_memory_count: usize,
    #[serde(default)]
    pub disk_usage_bytes: u64,
    #[serde(default)]
    pub artifacts: HashMap<String, ArtifactPersistence>,
}

/// Client bound to one kernel's base URL.
#[derive(Debug, Clone)]
pub struct KernelClient {
    kernel_id: String,
    base_url: String,
    http: reqwest::Client,
}

impl KernelClient {
    pub fn new(kernel_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            kernel_id: kernel_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn unhealthy(&self, message: impl std::fmt::Display) -> ExecutionError {
        ExecutionError::KernelUnhealthy {
            kernel_id: self.kernel_id.clone(),
            message: message.to_string(),
        }
    }

    /// Run user code on the kernel. The request is cancel-aware and
    /// bounded by `timeout` when given; the kernel may ignore
    /// interruption for non-cooperative code, in which case the timeout
    /// is the backstop.
    pub async fn execute(
        &self,
        request: &ExecuteRequest,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExecuteResponse, ExecutionError> {
        let mut builder = self
            .http
            .post(format!("{}/execute", self.base_url))
            .json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(ExecutionError::Cancelled),
            response = builder.send() => response,
        };
        let response = response.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout {
                    node_id: request.node_id,
                    elapsed: timeout.unwrap_or_default(),
                }
            } else {
                self.unhealthy(e)
            }
        })?;
        if !response.status().is_success() {
            return Err(self.unhealthy(format!("/execute returned {}", response.status())));
        }
        response
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| ExecutionError::Protocol(e.to_string()))
    }

    pub async fn health(&self) -> Result<HealthResponse, ExecutionError> {
        self.get_json("/health").await
    }

    pub async fn artifacts(&self) -> Result<HashMap<String, ArtifactMeta>, ExecutionError> {
        self.get_json("/artifacts").await
    }

    pub async fn recover(&self) -> Result<RecoveryStatus, ExecutionError> {
        self.post_json("/recover", &serde_json::json!({})).await
    }

    pub async fn cleanup(
        &self,
        request: &CleanupRequest,
    ) -> Result<CleanupResponse, ExecutionError> {
        self.post_json("/cleanup", request).await
    }

    pub async fn persistence(&self) -> Result<PersistenceInfo, ExecutionError> {
        self.get_json("/persistence").await
    }

    /// Wipe memory and disk for this kernel.
    pub async fn clear(&self) -> Result<(), ExecutionError> {
        let response = self
            .http
            .post(format!("{}/clear", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unhealthy(e))?;
        if !response.status().is_success() {
            return Err(self.unhealthy(format!("/clear returned {}", response.status())));
        }
        Ok(())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, ExecutionError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await
            .map_err(|e| self.unhealthy(e))?;
        if !response.status().is_success() {
            return Err(self.unhealthy(format!("{path} returned {}", response.status())));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ExecutionError::Protocol(e.to_string()))
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ExecutionError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .timeout(CONTROL_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| self.unhealthy(e))?;
        if !response.status().is_success() {
            return Err(self.unhealthy(format!("{path} returned {}", response.status())));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ExecutionError::Protocol(e.to_string()))
    }
}
