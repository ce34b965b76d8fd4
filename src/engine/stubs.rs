// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Stub transforms for exercising the engine without a dataframe
//! backend.
//!
//! The stubs compose deterministic pseudo-plans (JSON describing the
//! node and its inputs) so scheduler, cache and fingerprint behaviour
//! can be tested end to end. They are also what the demo CLI registers
//! when no real transform set is wired in.

use std::time::Duration;

use async_trait::async_trait;

use crate::cache::CacheEntry;
use crate::errors::ExecutionError;
use crate::graph::{Node, NodeKind};

use super::context::ExecutionContext;
use super::transform::{NodeInputs, NodeTransform, TransformOutput, TransformRegistry};

/// Composes a deterministic pseudo-plan from the node's settings and its
/// input plans. Same lineage, same bytes.
pub struct StubTransform;

#[async_trait]
impl NodeTransform for StubTransform {
    fn name(&self) -> &'static str {
        "stub"
    }

    async fn run(
        &self,
        _ctx: &ExecutionContext,
        node: &Node,
        inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError> {
        Ok(TransformOutput::Plan(compose_plan(node, inputs)))
    }
}

/// Fails every execution with a transform error, for failure-path tests.
pub struct FailingTransform {
    pub message: String,
}

impl FailingTransform {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl NodeTransform for FailingTransform {
    fn name(&self) -> &'static str {
        "failing-stub"
    }

    async fn run(
        &self,
        _ctx: &ExecutionContext,
        node: &Node,
        _inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError> {
        Err(ExecutionError::NodeFailed {
            node_id: node.node_id,
            message: self.message.clone(),
        })
    }
}

/// Sleeps before composing, for wall-clock parallelism tests.
pub struct SleepTransform {
    pub delay: Duration,
}

impl SleepTransform {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl NodeTransform for SleepTransform {
    fn name(&self) -> &'static str {
        "sleep-stub"
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        node: &Node,
        inputs: &NodeInputs,
    ) -> Result<TransformOutput, ExecutionError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ExecutionError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }
        Ok(TransformOutput::Plan(compose_plan(node, inputs)))
    }
}

/// A registry with the stub wired to every dataframe kind plus the
/// built-in routing transforms.
pub fn stub_registry() -> TransformRegistry {
    let mut registry = TransformRegistry::with_builtins();
    for kind in [
        NodeKind::ManualInput,
        NodeKind::Read,
        NodeKind::Filter,
        NodeKind::Select,
        NodeKind::Sort,
        NodeKind::GroupBy,
        NodeKind::Join,
        NodeKind::CrossJoin,
        NodeKind::Union,
        NodeKind::Pivot,
        NodeKind::Unpivot,
        NodeKind::RecordId,
        NodeKind::Formula,
        NodeKind::PolarsCode,
        NodeKind::Cache,
        NodeKind::UserDefined,
    ] {
        registry.register(kind, std::sync::Arc::new(StubTransform));
    }
    registry
}

fn compose_plan(node: &Node, inputs: &NodeInputs) -> Vec<u8> {
    let input_digest: Vec<String> = inputs
        .all()
        .iter()
        .map(|entry| match entry {
            CacheEntry::LazyPlan(bytes) => {
                crate::fingerprint::Digest::of_bytes(bytes).to_hex()
            }
            CacheEntry::MaterialisedTable(path) => path.to_string_lossy().into_owned(),
            CacheEntry::ExternalRef(url) => url.clone(),
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "kind": node.kind.as_str(),
        "settings": node.settings.as_ref().map(|s| s.to_value()),
        "inputs": input_digest,
    }))
    .unwrap_or_default()
}
