// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Artifact metadata tracking across the flow graph.
//!
//! Artifacts are opaque Python objects living inside kernel containers;
//! the engine tracks only references (name, source node, kernel, type
//! info) so it can reason about availability across the DAG. An artifact
//! is available to a node iff an ancestor on the **same** kernel
//! published it and no ancestor deleted it since; a later republish
//! overrides a delete.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::errors::ExecutionError;
use crate::graph::NodeId;

/// Artifact metadata as reported by a kernel at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ArtifactMeta {
    pub name: String,
    #[serde(default)]
    pub type_name: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub size_bytes: u64,
}

/// Metadata reference to an artifact (never the object itself).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    pub source_node_id: NodeId,
    pub kernel_id: String,
    pub type_name: String,
    pub module: String,
    pub size_bytes: u64,
    /// Unix milliseconds.
    pub created_at: u64,
}

/// Artifact bookkeeping for a single node.
#[derive(Debug, Clone, Default)]
pub struct NodeArtifactState {
    pub published: Vec<ArtifactRef>,
    pub available: HashMap<String, ArtifactRef>,
    pub consumed: Vec<String>,
    pub deleted: Vec<String>,
}

/// Tracks artifact availability across the flow graph.
///
/// Metadata-only: the actual objects stay inside the kernel container's
/// store. A reverse index `(kernel, name) -> publishers` keeps deletes
/// and kernel clears away from O(nodes) scans.
#[derive(Debug, Default)]
pub struct ArtifactContext {
    node_states: HashMap<NodeId, NodeArtifactState>,
    kernel_artifacts: HashMap<String, HashMap<String, ArtifactRef>>,
    publisher_index: HashMap<(String, String), HashSet<NodeId>>,
}

impl ArtifactContext {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record artifacts published by `node_id` on `kernel_id`.
    ///
    /// A duplicate name within one call fails with
    /// `ArtifactAlreadyExists` unless the same call also deleted that
    /// name first (republish-after-delete).
    pub fn record_published(
        &mut self,
        node_id: NodeId,
        kernel_id: &str,
        artifacts: &[ArtifactMeta],
        deleted_in_same_call: &[String],
    ) -> Result<Vec<ArtifactRef>, ExecutionError> {
        let mut seen: HashSet<&str> = HashSet::new();
        for meta in artifacts {
            if !seen.insert(meta.name.as_str())
                && !deleted_in_same_call.contains(&meta.name)
            {
                return Err(ExecutionError::ArtifactAlreadyExists(meta.name.clone()));
            }
        }

        let state = self.node_states.entry(node_id).or_default();
        let mut refs = Vec::with_capacity(artifacts.len());
        for meta in artifacts {
            let artifact = ArtifactRef {
                name: meta.name.clone(),
                source_node_id: node_id,
                kernel_id: kernel_id.to_string(),
                type_name: meta.type_name.clone(),
                module: meta.module.clone(),
                size_bytes: meta.size_bytes,
                created_at: unix_millis(),
            };
            state.published.push(artifact.clone());
            self.kernel_artifacts
                .entry(kernel_id.to_string())
                .or_default()
                .insert(artifact.name.clone(), artifact.clone());
            self.publisher_index
                .entry((kernel_id.to_string(), artifact.name.clone()))
                .or_default()
                .insert(node_id);
            refs.push(artifact);
        }
        tracing::debug!(
            node_id,
            kernel_id,
            count = refs.len(),
            "recorded published artifacts"
        );
        Ok(refs)
    }

    /// Record that `node_id` read the given artifact names.
    pub fn record_consumed(&mut self, node_id: NodeId, names: &[String]) {
        self.node_states
            .entry(node_id)
            .or_default()
            .consumed
            .extend(names.iter().cloned());
    }

    /// Record that `node_id` deleted artifacts from `kernel_id`, pruning
    /// the kernel index and publishers' published lists via the reverse
    /// index.
    pub fn record_deleted(&mut self, node_id: NodeId, kernel_id: &str, names: &[String]) {
        self.node_states
            .entry(node_id)
            .or_default()
            .deleted
            .extend(names.iter().cloned());

        for name in names {
            if let Some(kernel_map) = self.kernel_artifacts.get_mut(kernel_id) {
                kernel_map.remove(name);
            }
            let key = (kernel_id.to_string(), name.clone());
            if let Some(publishers) = self.publisher_index.remove(&key) {
                for publisher in publishers {
                    if let Some(state) = self.node_states.get_mut(&publisher) {
                        state
                            .published
                            .retain(|r| !(r.kernel_id == kernel_id && &r.name == name));
                    }
                }
            }
        }
    }

    /// Forget everything `node_id` previously published (re-execution
    /// clears only the node's own artifacts). Returns the names so the
    /// caller can ask the kernel to drop the objects too.
    pub fn clear_node_published(&mut self, node_id: NodeId) -> Vec<String> {
        let published = match self.node_states.get_mut(&node_id) {
            Some(state) => std::mem::take(&mut state.published),
            None => return Vec::new(),
        };
        let mut names = Vec::with_capacity(published.len());
        for artifact in published {
            let key = (artifact.kernel_id.clone(), artifact.name.clone());
            if let Some(publishers) = self.publisher_index.get_mut(&key) {
                publishers.remove(&node_id);
                if publishers.is_empty() {
                    self.publisher_index.remove(&key);
                    if let Some(kernel_map) =
                        self.kernel_artifacts.get_mut(&artifact.kernel_id)
                    {
                        kernel_map.remove(&artifact.name);
                    }
                }
            }
            names.push(artifact.name);
        }
        names
    }

    // ------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------

    /// Compute which artifacts are available to `node_id`: everything
    /// published by an upstream node on the same kernel. The result is
    /// also stored on the node's state.
    pub fn compute_available(
        &mut self,
        node_id: NodeId,
        kernel_id: &str,
        upstream_node_ids: &[NodeId],
    ) -> HashMap<String, ArtifactRef> {
        let mut available = HashMap::new();
        for upstream in upstream_node_ids {
            if let Some(state) = self.node_states.get(upstream) {
                for artifact in &state.published {
                    if artifact.kernel_id == kernel_id {
                        available.insert(artifact.name.clone(), artifact.clone());
                    }
                }
            }
        }
        self.node_states.entry(node_id).or_default().available = available.clone();
        tracing::debug!(node_id, kernel_id, count = available.len(), "computed availability");
        available
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn published_by_node(&self, node_id: NodeId) -> Vec<ArtifactRef> {
        self.node_states
            .get(&node_id)
            .map(|s| s.published.clone())
            .unwrap_or_default()
    }

    pub fn available_for_node(&self, node_id: NodeId) -> HashMap<String, ArtifactRef> {
        self.node_states
            .get(&node_id)
            .map(|s| s.available.clone())
            .unwrap_or_default()
    }

    pub fn kernel_artifacts(&self, kernel_id: &str) -> HashMap<String, ArtifactRef> {
        self.kernel_artifacts
            .get(kernel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn all_artifacts(&self) -> HashMap<String, ArtifactRef> {
        let mut out = HashMap::new();
        for kernel_map in self.kernel_artifacts.values() {
            out.extend(kernel_map.clone());
        }
        out
    }

    // ------------------------------------------------------------------
    // Clearing
    // ------------------------------------------------------------------

    /// Remove tracking for a whole kernel.
    pub fn clear_kernel(&mut self, kernel_id: &str) {
        self.publisher_index.retain(|(k, _), _| k != kernel_id);
        self.kernel_artifacts.remove(kernel_id);
        for state in self.node_states.values_mut() {
            state.published.retain(|r| r.kernel_id != kernel_id);
            state.available.retain(|_, r| r.kernel_id != kernel_id);
        }
    }

    pub fn clear_all(&mut self) {
        self.node_states.clear();
        self.kernel_artifacts.clear();
        self.publisher_index.clear();
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
