// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Engine configuration: per-flow settings and process-level environment.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lower bound on per-flow parallelism; a value of 1 degrades to
/// sequential execution while preserving stage order.
pub const MIN_PARALLEL_WORKERS: usize = 1;

/// Default per-flow parallelism when neither the flow nor the environment
/// overrides it.
pub const DEFAULT_PARALLEL_WORKERS: usize = 4;

/// How eagerly intermediate results are materialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Materialise every node result to disk so reruns hit the cache and
    /// intermediate tables can be inspected.
    #[default]
    Development,
    /// Keep results lazy wherever downstream consumers allow it.
    Performance,
}

/// Where heavy operations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionLocation {
    #[default]
    Auto,
    Local,
    Remote,
}

impl ExecutionLocation {
    /// Resolve `auto` at scheduling time. The stored setting is never
    /// rewritten; resolution is a pure function of worker availability.
    pub fn resolve(&self, worker_configured: bool) -> ResolvedLocation {
        match self {
            ExecutionLocation::Local => ResolvedLocation::Local,
            ExecutionLocation::Remote => ResolvedLocation::Remote,
            ExecutionLocation::Auto => {
                if worker_configured {
                    ResolvedLocation::Remote
                } else {
                    ResolvedLocation::Local
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLocation {
    Local,
    Remote,
}

/// Per-flow settings, owned by the flow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub execution_mode: ExecutionMode,
    #[serde(default)]
    pub execution_location: ExecutionLocation,
    #[serde(default)]
    pub auto_save: bool,
    #[serde(default)]
    pub show_detailed_progress: bool,
    #[serde(default = "default_parallel_workers")]
    pub max_parallel_workers: usize,
    /// Global run deadline; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_deadline_seconds: Option<u64>,
}

fn default_parallel_workers() -> usize {
    DEFAULT_PARALLEL_WORKERS
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            description: String::new(),
            execution_mode: ExecutionMode::default(),
            execution_location: ExecutionLocation::default(),
            auto_save: false,
            show_detailed_progress: false,
            max_parallel_workers: DEFAULT_PARALLEL_WORKERS,
            run_deadline_seconds: None,
        }
    }
}

impl FlowSettings {
    /// Effective parallelism, clamped to the configured minimum.
    pub fn parallelism(&self) -> usize {
        self.max_parallel_workers.max(MIN_PARALLEL_WORKERS)
    }
}

/// Deployment flavour, from `FLOWFILE_MODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployMode {
    #[default]
    Electron,
    Docker,
}

/// Process-level configuration sourced from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the on-disk result cache (`FLOWFILE_CACHE_DIR`).
    pub cache_dir: PathBuf,
    /// Base URL of the worker process (`FLOWFILE_WORKER_URL`); `None`
    /// disables worker dispatch.
    pub worker_url: Option<String>,
    /// Volume shared with kernel containers (`FLOWFILE_SHARED_VOLUME`).
    pub shared_volume: PathBuf,
    /// Override for per-flow parallelism defaults
    /// (`FLOWFILE_MAX_PARALLEL_WORKERS`).
    pub max_parallel_workers: Option<usize>,
    /// `FLOWFILE_MODE`, electron or docker.
    pub mode: DeployMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("flowfile-cache"),
            worker_url: None,
            shared_volume: std::env::temp_dir().join("flowfile-shared"),
            max_parallel_workers: None,
            mode: DeployMode::Electron,
        }
    }
}

impl EngineConfig {
    /// Read configuration from `FLOWFILE_*` environment variables, using
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("FLOWFILE_CACHE_DIR") {
            if !dir.is_empty() {
                config.cache_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("FLOWFILE_WORKER_URL") {
            if !url.is_empty() {
                config.worker_url = Some(url);
            }
        }
        if let Ok(volume) = std::env::var("FLOWFILE_SHARED_VOLUME") {
            if !volume.is_empty() {
                config.shared_volume = PathBuf::from(volume);
            }
        }
        if let Ok(workers) = std::env::var("FLOWFILE_MAX_PARALLEL_WORKERS") {
            if let Ok(parsed) = workers.parse::<usize>() {
                config.max_parallel_workers = Some(parsed.max(MIN_PARALLEL_WORKERS));
            }
        }
        if let Ok(mode) = std::env::var("FLOWFILE_MODE") {
            config.mode = match mode.as_str() {
                "docker" => DeployMode::Docker,
                _ => DeployMode::Electron,
            };
        }
        config
    }

    /// Flow settings seeded with the process-level parallelism override.
    pub fn default_flow_settings(&self) -> FlowSettings {
        let mut settings = FlowSettings::default();
        if let Some(workers) = self.max_parallel_workers {
            settings.max_parallel_workers = workers;
        }
        settings
    }
}
