// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The transform seam: `kind -> executor` registry.
//!
//! Concrete dataframe transforms are external collaborators; the engine
//! invokes them through [`NodeTransform`] and handles caching,
//! materialisation and scheduling around them. Two transforms ship
//! built in because they are pure routing: `python_script` (kernel
//! dispatch) and `output` (worker write). Everything else is registered
//! by the embedder; tests use the stubs module.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::errors::ExecutionError;
use crate::graph::{Node, NodeKind, NodeSettings};
use crate::kernel::ScriptRequest;
use crate::worker::{task_id_for, Operation, TaskMeta, WorkerResult};

use super::context::ExecutionContext;
use super::progress::ProgressEvent;

/// Resolved input results for one node, gathered by the scheduler after
/// all predecessors completed.
#[derive(Debug, Clone, Default)]
pub struct NodeInputs {
    pub main: Vec<CacheEntry>,
    pub left: Option<CacheEntry>,
    pub right: Option<CacheEntry>,
}

impl NodeInputs {
    /// Every input entry in slot order: left, right, then main.
    pub fn all(&self) -> Vec<&CacheEntry> {
        let mut out = Vec::new();
        if let Some(left) = &self.left {
            out.push(left);
        }
        if let Some(right) = &self.right {
            out.push(right);
        }
        out.extend(self.main.iter());
        out
    }

    /// The single main input, for `Single`-shaped kinds.
    pub fn sole(&self) -> Result<&CacheEntry, ExecutionError> {
        match self.main.as_slice() {
            [entry] => Ok(entry),
            other => Err(ExecutionError::Internal(format!(
                "expected exactly one main input, got {}",
                other.len()
            ))),
        }
    }
}

/// What a transform produced for its node.
#[derive(Debug, Clone)]
pub enum TransformOutput {
    /// A composed lazy plan; the engine decides whether to materialise.
    Plan(Vec<u8>),
    /// An already materialised table on disk.
    Table(PathBuf),
    /// A reference into external storage (writers).
    External(String),
    /// No tabular result (scripts that only publish artifacts).
    Empty,
}

/// A node executor. Implementations compose or produce the node's result
/// from its settings and input results; they do not touch the cache or
/// the dependency graph.
#[async_trait]
pub trait NodeTransform: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError>;
}

/// Registry mapping node kinds to their executors.
#[derive(Default)]
pub struct TransformRegistry {
    transforms: HashMap<NodeKind, Arc<dyn NodeTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-wired with the built-in routing transforms.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(NodeKind::PythonScript, Arc::new(PythonScriptTransform));
        registry.register(NodeKind::Output, Arc::new(OutputTransform));
        registry
    }

    pub fn register(&mut self, kind: NodeKind, transform: Arc<dyn NodeTransform>) {
        self.transforms.insert(kind, transform);
    }

    pub fn get(&self, kind: NodeKind) -> Option<Arc<dyn NodeTransform>> {
        self.transforms.get(&kind).cloned()
    }
}

/// Routes `python_script` nodes to their assigned kernel, wiring input
/// table paths, the per-node output directory and the artifact
/// availability set into the execution contract.
pub struct PythonScriptTransform;

#[async_trait]
impl NodeTransform for PythonScriptTransform {
    fn name(&self) -> &'static str {
        "python_script"
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError> {
        let settings = match &node.settings {
            Some(NodeSettings::PythonScript(settings)) => settings,
            _ => {
                return Err(ExecutionError::Internal(
                    "python_script node without script settings".into(),
                ))
            }
        };
        let kernels = ctx.kernels.as_ref().ok_or_else(|| {
            ExecutionError::KernelUnhealthy {
                kernel_id: settings.kernel_id.clone(),
                message: "no kernel coordinator configured".into(),
            }
        })?;

        let input_paths = materialised_paths(ctx, node, inputs).await?;
        let output_dir = ctx
            .cache
            .flow_dir()
            .join(format!("node_{}", node.node_id));
        tokio::fs::create_dir_all(&output_dir).await?;

        let request = ScriptRequest {
            node_id: node.node_id,
            kernel_id: settings.kernel_id.clone(),
            code: settings.code.clone(),
            input_paths,
            output_dir: output_dir.to_string_lossy().into_owned(),
            ancestors: ctx.ancestors_of(node.node_id),
            timeout: node.timeout_seconds.map(std::time::Duration::from_secs),
        };
        let outcome = kernels.execute_script(&request, &ctx.cancel).await?;

        match outcome.output_paths.first() {
            Some(path) => Ok(TransformOutput::Table(PathBuf::from(path))),
            None => Ok(TransformOutput::Empty),
        }
    }
}

/// Routes `output` nodes through the worker's `write_output` operation.
pub struct OutputTransform;

#[async_trait]
impl NodeTransform for OutputTransform {
    fn name(&self) -> &'static str {
        "output"
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError> {
        let settings = match &node.settings {
            Some(NodeSettings::Output(settings)) => settings,
            _ => {
                return Err(ExecutionError::Internal(
                    "output node without output settings".into(),
                ))
            }
        };
        let worker = ctx.worker.as_ref().ok_or_else(|| {
            ExecutionError::NodeFailed {
                node_id: node.node_id,
                message: "writing output requires a worker".into(),
            }
        })?;

        let plan = input_plan_bytes(inputs.sole()?)?;
        let fingerprint = node
            .fingerprint
            .ok_or_else(|| ExecutionError::Internal("output node without fingerprint".into()))?;
        let meta = TaskMeta {
            task_id: task_id_for(&fingerprint, Operation::WriteOutput),
            operation: Operation::WriteOutput,
            flow_id: ctx.flow_id,
            node_id: node.node_id,
            kwargs: serde_json::json!({
                "path": settings.path,
                "format": settings.format,
                "write_mode": settings.write_mode,
            }),
        };

        let node_id = node.node_id;
        let progress = ctx.progress.clone();
        let result = worker
            .submit(&meta, &[plan], &ctx.cancel, &mut |p| {
                progress.emit(ProgressEvent::NodeProgress {
                    node_id,
                    progress: p,
                });
            })
            .await?;

        match result {
            WorkerResult::Done { file_ref } if !file_ref.is_empty() => {
                Ok(TransformOutput::External(file_ref))
            }
            _ => Ok(TransformOutput::External(settings.path.clone())),
        }
    }
}

/// Plan bytes for an input entry. Materialised tables are passed down as
/// scan references by path; external refs cannot feed a worker plan.
fn input_plan_bytes(entry: &CacheEntry) -> Result<Vec<u8>, ExecutionError> {
    match entry {
        CacheEntry::LazyPlan(bytes) => Ok(bytes.as_ref().clone()),
        CacheEntry::MaterialisedTable(path) => {
            // A table reference crosses the wire as a scan marker the
            // worker resolves against the shared cache volume.
            Ok(scan_marker(path))
        }
        CacheEntry::ExternalRef(url) => Err(ExecutionError::Internal(format!(
            "external ref '{url}' cannot be used as a plan input"
        ))),
    }
}

/// Wire form of "scan this materialised file".
pub(crate) fn scan_marker(path: &std::path::Path) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "scan": path.to_string_lossy(),
    }))
    .unwrap_or_default()
}

/// Collect materialised file paths for kernel input, materialising lazy
/// inputs through the worker when one is available.
async fn materialised_paths(
    ctx: &ExecutionContext,
    node: &Node,
    inputs: &NodeInputs,
) -> Result<Vec<String>, ExecutionError> {
    let mut paths = Vec::new();
    for entry in inputs.all() {
        match entry {
            CacheEntry::MaterialisedTable(path) => {
                paths.push(path.to_string_lossy().into_owned());
            }
            CacheEntry::ExternalRef(url) => paths.push(url.clone()),
            CacheEntry::LazyPlan(bytes) => {
                let Some(worker) = ctx.worker.as_ref() else {
                    tracing::warn!(
                        node_id = node.node_id,
                        "lazy input to a script node cannot be materialised without a worker"
                    );
                    continue;
                };
                let fingerprint = node.fingerprint.ok_or_else(|| {
                    ExecutionError::Internal("script node without fingerprint".into())
                })?;
                let meta = TaskMeta {
                    task_id: format!(
                        "input{}-{}",
                        paths.len(),
                        task_id_for(&fingerprint, Operation::Store)
                    ),
                    operation: Operation::Store,
                    flow_id: ctx.flow_id,
                    node_id: node.node_id,
                    kwargs: serde_json::Value::Null,
                };
                let result = worker
                    .submit(&meta, &[bytes.as_ref().clone()], &ctx.cancel, &mut |_| {})
                    .await?;
                match result {
                    WorkerResult::Plan { file_ref, .. } if !file_ref.is_empty() => {
                        paths.push(file_ref);
                    }
                    other => {
                        return Err(ExecutionError::Protocol(format!(
                            "store for script input returned {other:?}"
                        )))
                    }
                }
            }
        }
    }
    Ok(paths)
}
