// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Flow file load/save.
//!
//! Flow files are YAML or JSON with the same shape; the extension picks
//! the parser. Legacy field spellings are upgraded by a compatibility
//! pass before deserialization, so old exports keep loading. Pickle
//! `.flowfile` archives are a Python-era format and are rejected with a
//! dedicated error telling the caller to convert them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::FlowSettings;
use crate::errors::FlowFileError;
use crate::graph::{
    FlowGraph, FlowId, InputSlot, NodeId, NodeKind, NodePromise, NodeSettings,
};

pub const FLOWFILE_VERSION: &str = "2.0";

/// On-disk shape of a flow file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowfileDocument {
    pub flowfile_version: String,
    pub flowfile_id: FlowId,
    pub flowfile_name: String,
    #[serde(default)]
    pub flowfile_settings: FlowSettings,
    #[serde(default)]
    pub nodes: Vec<FlowfileNode>,
}

/// One node record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowfileNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_start_node: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub x_position: f64,
    #[serde(default)]
    pub y_position: f64,
    #[serde(default)]
    pub left_input_id: Option<NodeId>,
    #[serde(default)]
    pub right_input_id: Option<NodeId>,
    #[serde(default)]
    pub input_ids: Vec<NodeId>,
    /// Redundant with the edge relation; preserved for UI round-trips.
    #[serde(default)]
    pub outputs: Vec<NodeId>,
    #[serde(default)]
    pub cache_results: bool,
    /// A failing or timed-out optional node does not fail the run.
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub setting_input: Value,
}

/// Load a flow file into a validated graph.
pub fn load_flow_file(path: &Path) -> Result<FlowGraph, FlowFileError> {
    if !path.exists() {
        return Err(FlowFileError::NotFound(path.to_path_buf()));
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content = std::fs::read_to_string(path).map_err(|source| FlowFileError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut raw: Value = match extension.as_str() {
        "yaml" | "yml" => {
            serde_yaml::from_str(&content).map_err(|e| FlowFileError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        }
        "json" => serde_json::from_str(&content).map_err(|e| FlowFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        "flowfile" => return Err(FlowFileError::LegacyPickle(path.to_path_buf())),
        other => return Err(FlowFileError::UnsupportedExtension(other.to_string())),
    };

    ensure_compatibility(&mut raw);
    let document: FlowfileDocument =
        serde_json::from_value(raw).map_err(|e| FlowFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    debug!(path = %path.display(), nodes = document.nodes.len(), "flow file parsed");

    document_to_graph(&document).map_err(|message| FlowFileError::Invalid {
        path: path.to_path_buf(),
        message,
    })
}

/// Save a graph in the format matching the path's extension.
pub fn save_flow_file(graph: &FlowGraph, path: &Path) -> Result<(), FlowFileError> {
    let document = graph_to_document(graph);
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    let content = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::to_string(&document).map_err(|e| FlowFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        "json" => serde_json::to_string_pretty(&document).map_err(|e| FlowFileError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?,
        other => return Err(FlowFileError::UnsupportedExtension(other.to_string())),
    };
    std::fs::write(path, content).map_err(|source| FlowFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Upgrade legacy field names and enum casings in place.
///
/// Handles exports from before the naming settled: `flow_id` /
/// `flow_name` at the top level, `node_id` / `node_type` / `pos_x` /
/// `pos_y` / `depending_on_ids` in node records, and TitleCase execution
/// mode values.
pub fn ensure_compatibility(raw: &mut Value) {
    let Some(root) = raw.as_object_mut() else { return };

    rename_key(root, "flow_id", "flowfile_id");
    rename_key(root, "flow_name", "flowfile_name");
    rename_key(root, "name", "flowfile_name");
    rename_key(root, "flow_settings", "flowfile_settings");
    if !root.contains_key("flowfile_version") {
        root.insert(
            "flowfile_version".to_string(),
            Value::String("1.0".to_string()),
        );
    }

    if let Some(settings) = root
        .get_mut("flowfile_settings")
        .and_then(Value::as_object_mut)
    {
        rename_key(settings, "number_of_processes", "max_parallel_workers");
        for key in ["execution_mode", "execution_location"] {
            if let Some(Value::String(s)) = settings.get_mut(key) {
                *s = s.to_lowercase();
            }
        }
    }

    if let Some(nodes) = root.get_mut("nodes").and_then(Value::as_array_mut) {
        for node in nodes {
            let Some(node) = node.as_object_mut() else { continue };
            rename_key(node, "node_id", "id");
            rename_key(node, "node_type", "type");
            rename_key(node, "pos_x", "x_position");
            rename_key(node, "pos_y", "y_position");
            rename_key(node, "depending_on_ids", "input_ids");
            rename_key(node, "setting_inputs", "setting_input");
        }
    }
}

fn rename_key(map: &mut serde_json::Map<String, Value>, from: &str, to: &str) {
    if !map.contains_key(to) {
        if let Some(value) = map.remove(from) {
            map.insert(to.to_string(), value);
        }
    }
}

/// Materialise a document into a graph, wiring nodes, settings and
/// edges. Returns a message describing the first violation on failure.
pub fn document_to_graph(document: &FlowfileDocument) -> Result<FlowGraph, String> {
    let mut graph = FlowGraph::new(
        document.flowfile_id,
        document.flowfile_name.clone(),
        document.flowfile_settings.clone(),
    );

    for node in &document.nodes {
        let kind = NodeKind::from_str(&node.kind)
            .ok_or_else(|| format!("node {}: unknown kind '{}'", node.id, node.kind))?;
        graph
            .add_node(NodePromise {
                node_id: node.id,
                kind,
                position_x: node.x_position,
                position_y: node.y_position,
                description: node.description.clone(),
            })
            .map_err(|e| e.to_string())?;
        {
            let entry = graph.node_mut(node.id).expect("just added");
            entry.cache_results = node.cache_results;
            entry.is_start_node = node.is_start_node;
            entry.optional = node.optional;
            entry.timeout_seconds = node.timeout_seconds;
        }
        if !node.setting_input.is_null() {
            let settings = NodeSettings::from_value(kind, node.setting_input.clone())
                .map_err(|errors| {
                    let joined: Vec<String> =
                        errors.iter().map(|e| e.to_string()).collect();
                    format!("node {}: {}", node.id, joined.join("; "))
                })?;
            graph
                .set_node_settings(node.id, settings)
                .map_err(|e| format!("node {}: {e}", node.id))?;
        }
    }

    for node in &document.nodes {
        if let Some(left) = node.left_input_id {
            graph
                .connect(left, node.id, InputSlot::Left)
                .map_err(|e| e.to_string())?;
        }
        if let Some(right) = node.right_input_id {
            graph
                .connect(right, node.id, InputSlot::Right)
                .map_err(|e| e.to_string())?;
        }
        for &input in &node.input_ids {
            graph
                .connect(input, node.id, InputSlot::Main)
                .map_err(|e| e.to_string())?;
        }
    }

    Ok(graph)
}

/// The inverse of [`document_to_graph`].
pub fn graph_to_document(graph: &FlowGraph) -> FlowfileDocument {
    let mut nodes = Vec::new();
    for node_id in graph.node_ids() {
        let node = graph.node(node_id).expect("listed id");
        let mut left_input_id = None;
        let mut right_input_id = None;
        let mut input_ids = Vec::new();
        for (pred, slot) in graph.predecessors(node_id) {
            match slot {
                InputSlot::Left => left_input_id = Some(pred),
                InputSlot::Right => right_input_id = Some(pred),
                InputSlot::Main => input_ids.push(pred),
            }
        }
        nodes.push(FlowfileNode {
            id: node_id,
            kind: node.kind.as_str().to_string(),
            is_start_node: node.is_start_node,
            description: node.description.clone(),
            x_position: node.position_x,
            y_position: node.position_y,
            left_input_id,
            right_input_id,
            input_ids,
            outputs: graph.successors(node_id),
            cache_results: node.cache_results,
            optional: node.optional,
            timeout_seconds: node.timeout_seconds,
            setting_input: node
                .settings
                .as_ref()
                .map(|s| s.to_value())
                .unwrap_or(Value::Null),
        });
    }

    FlowfileDocument {
        flowfile_version: FLOWFILE_VERSION.to_string(),
        flowfile_id: graph.flow_id(),
        flowfile_name: graph.name().to_string(),
        flowfile_settings: graph.settings().clone(),
        nodes,
    }
}
