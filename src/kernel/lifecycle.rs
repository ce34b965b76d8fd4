// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Kernel container lifecycle.
//!
//! The coordinator owns container creation, start, health polling, port
//! allocation and teardown. The Docker launcher shells out to the docker
//! CLI; non-container deployments (tests, remote kernels) register their
//! endpoints with the coordinator directly and skip this module.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::ExecutionError;

use super::client::KernelClient;

/// Kernel lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    #[default]
    Created,
    Starting,
    Idle,
    Busy,
    Stopped,
    Failed,
}

/// What to launch for a kernel.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub kernel_id: String,
    pub image: String,
    /// Host path mounted into the container for artifact persistence.
    pub shared_volume: PathBuf,
    pub persistence_enabled: bool,
    /// `lazy` (index at startup, deserialise on first read) or `eager`.
    pub recovery_mode: String,
    pub owner_user_id: Option<String>,
}

/// A started container: its id, host port and client endpoint.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    pub container_id: String,
    pub port: u16,
    pub base_url: String,
}

/// Abstraction over the container runtime so the coordinator can be
/// driven by Docker in production and by plain endpoints in tests.
#[async_trait]
pub trait KernelLauncher: Send + Sync {
    async fn launch(&self, spec: &KernelSpec) -> Result<ContainerHandle, ExecutionError>;
    async fn terminate(&self, handle: &ContainerHandle) -> Result<(), ExecutionError>;
}

/// Docker-CLI-backed launcher.
pub struct DockerKernelLauncher {
    /// How long to poll `/health` before declaring the start failed.
    startup_timeout: Duration,
}

impl Default for DockerKernelLauncher {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(60),
        }
    }
}

impl DockerKernelLauncher {
    pub fn new(startup_timeout: Duration) -> Self {
        Self { startup_timeout }
    }
}

#[async_trait]
impl KernelLauncher for DockerKernelLauncher {
    async fn launch(&self, spec: &KernelSpec) -> Result<ContainerHandle, ExecutionError> {
        let port = allocate_port().await?;
        let persistence_path = "/shared/artifacts";
        let volume_arg = format!(
            "{}:{persistence_path}",
            spec.shared_volume.join(&spec.kernel_id).display()
        );

        let mut command = Command::new("docker");
        command
            .arg("run")
            .arg("--detach")
            .arg("--rm")
            .args(["--publish", &format!("127.0.0.1:{port}:8000")])
            .args(["--volume", &volume_arg])
            .args(["--env", &format!("KERNEL_ID={}", spec.kernel_id)])
            .args([
                "--env",
                &format!("PERSISTENCE_ENABLED={}", spec.persistence_enabled),
            ])
            .args(["--env", &format!("PERSISTENCE_PATH={persistence_path}")])
            .args(["--env", &format!("RECOVERY_MODE={}", spec.recovery_mode)]);
        if let Some(owner) = &spec.owner_user_id {
            command.args(["--label", &format!("flowfile.owner={owner}")]);
        }
        command.arg(&spec.image);

        let output = command.output().await.map_err(|e| {
            ExecutionError::KernelUnhealthy {
                kernel_id: spec.kernel_id.clone(),
                message: format!("docker run failed to spawn: {e}"),
            }
        })?;
        if !output.status.success() {
            return Err(ExecutionError::KernelUnhealthy {
                kernel_id: spec.kernel_id.clone(),
                message: format!(
                    "docker run exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let container_id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let base_url = format!("http://127.0.0.1:{port}");
        info!(kernel_id = %spec.kernel_id, %container_id, port, "kernel container started");

        let handle = ContainerHandle {
            container_id,
            port,
            base_url: base_url.clone(),
        };
        let client = KernelClient::new(&spec.kernel_id, &base_url);
        if let Err(err) = wait_healthy(&client, self.startup_timeout).await {
            let _ = self.terminate(&handle).await;
            return Err(err);
        }
        Ok(handle)
    }

    async fn terminate(&self, handle: &ContainerHandle) -> Result<(), ExecutionError> {
        let output = Command::new("docker")
            .args(["rm", "--force", &handle.container_id])
            .output()
            .await
            .map_err(|e| ExecutionError::Io(e.to_string()))?;
        if !output.status.success() {
            warn!(
                container_id = %handle.container_id,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "docker rm failed"
            );
        }
        Ok(())
    }
}

/// Poll `/health` until it answers or the timeout expires.
pub async fn wait_healthy(
    client: &KernelClient,
    timeout: Duration,
) -> Result<(), ExecutionError> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut last_error = String::from("never reached");
    while tokio::time::Instant::now() < deadline {
        match client.health().await {
            Ok(_) => return Ok(()),
            Err(err) => last_error = err.to_string(),
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    Err(ExecutionError::KernelUnhealthy {
        kernel_id: client.kernel_id().to_string(),
        message: format!("health check timed out: {last_error}"),
    })
}

/// Grab a free host port by binding to port zero and releasing it.
async fn allocate_port() -> Result<u16, ExecutionError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| ExecutionError::Io(e.to_string()))?;
    let port = listener
        .local_addr()
        .map_err(|e| ExecutionError::Io(e.to_string()))?
        .port();
    drop(listener);
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ports_are_distinct_enough() {
        let a = allocate_port().await.unwrap();
        assert!(a > 0);
    }

    #[tokio::test]
    async fn wait_healthy_times_out_against_dead_endpoint() {
        let client = KernelClient::new("k-dead", "http://127.0.0.1:1");
        let err = wait_healthy(&client, Duration::from_millis(300)).await.unwrap_err();
        assert!(matches!(err, ExecutionError::KernelUnhealthy { .. }));
    }
}
