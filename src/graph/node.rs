// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use serde::{Deserialize, Serialize};

use super::settings::NodeSettings;
use super::NodeId;
use crate::fingerprint::Digest;

/// The closed set of node kinds the engine schedules.
///
/// Each kind dictates an input shape and a settings schema; the concrete
/// dataframe transforms behind most kinds are supplied by the embedder
/// through the transform registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    ManualInput,
    Read,
    Filter,
    Select,
    Sort,
    GroupBy,
    Join,
    CrossJoin,
    Union,
    Pivot,
    Unpivot,
    RecordId,
    Formula,
    PolarsCode,
    PythonScript,
    Output,
    Cache,
    UserDefined,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::ManualInput => "manual_input",
            NodeKind::Read => "read",
            NodeKind::Filter => "filter",
            NodeKind::Select => "select",
            NodeKind::Sort => "sort",
            NodeKind::GroupBy => "group_by",
            NodeKind::Join => "join",
            NodeKind::CrossJoin => "cross_join",
            NodeKind::Union => "union",
            NodeKind::Pivot => "pivot",
            NodeKind::Unpivot => "unpivot",
            NodeKind::RecordId => "record_id",
            NodeKind::Formula => "formula",
            NodeKind::PolarsCode => "polars_code",
            NodeKind::PythonScript => "python_script",
            NodeKind::Output => "output",
            NodeKind::Cache => "cache",
            NodeKind::UserDefined => "user_defined",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }

    /// The input shape this kind accepts. Every node uses exactly one
    /// shape; edges that do not fit are rejected at connect time.
    pub fn input_shape(&self) -> InputShape {
        match self {
            NodeKind::ManualInput | NodeKind::Read => InputShape::Source,
            NodeKind::Join | NodeKind::CrossJoin => InputShape::LeftRight,
            NodeKind::Union | NodeKind::PythonScript | NodeKind::UserDefined => {
                InputShape::Variadic
            }
            _ => InputShape::Single,
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an edge attaches on the consuming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputSlot {
    Main,
    Left,
    Right,
}

/// Input shapes dictated by node kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputShape {
    /// No inputs at all (readers, manual input).
    Source,
    /// Exactly one main input.
    Single,
    /// A variadic main input list.
    Variadic,
    /// One left and one right input, no main.
    LeftRight,
}

impl InputShape {
    /// Whether an edge on `slot` is acceptable for this shape at all.
    pub fn accepts(&self, slot: InputSlot) -> bool {
        match (self, slot) {
            (InputShape::Source, _) => false,
            (InputShape::Single, InputSlot::Main) => true,
            (InputShape::Variadic, InputSlot::Main) => true,
            (InputShape::LeftRight, InputSlot::Left | InputSlot::Right) => true,
            _ => false,
        }
    }

    /// Maximum number of edges on the main slot, `None` for unbounded.
    pub fn main_capacity(&self) -> Option<usize> {
        match self {
            InputShape::Source => Some(0),
            InputShape::Single => Some(1),
            InputShape::Variadic => None,
            InputShape::LeftRight => Some(0),
        }
    }

    /// Slots that must be connected before the node can be correct.
    pub fn required_slots(&self) -> &'static [InputSlot] {
        match self {
            InputShape::Source => &[],
            InputShape::Single | InputShape::Variadic => &[InputSlot::Main],
            InputShape::LeftRight => &[InputSlot::Left, InputSlot::Right],
        }
    }
}

/// Transient per-run state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Idle,
    Planned,
    Running,
    Done,
    Skipped,
    Failed,
}

/// A node placed on the canvas before its settings exist.
///
/// Promises insert with `is_correct = false` and no fingerprint; a typed
/// settings payload completes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePromise {
    pub node_id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub position_x: f64,
    #[serde(default)]
    pub position_y: f64,
    #[serde(default)]
    pub description: String,
}

/// One transformation in a flow.
#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub settings: Option<NodeSettings>,

    /// Materialise the result to disk during execution even in
    /// performance mode.
    pub cache_results: bool,
    /// Set by validation; false when settings are missing/invalid or a
    /// required input is absent or itself incorrect.
    pub is_correct: bool,
    /// A timed-out or failed optional node does not fail the run.
    pub optional: bool,
    /// Per-node execution deadline in seconds; unbounded when absent.
    pub timeout_seconds: Option<u64>,
    /// Caller-designated run root (flow start).
    pub is_start_node: bool,

    // UI-only, preserved verbatim.
    pub description: String,
    pub position_x: f64,
    pub position_y: f64,

    // Transient state, reset at the start of every run.
    pub state: NodeState,
    pub fingerprint: Option<Digest>,
    pub last_error: Option<String>,
}

impl Node {
    pub fn from_promise(promise: NodePromise) -> Self {
        Self {
            node_id: promise.node_id,
            kind: promise.kind,
            settings: None,
            cache_results: false,
            is_correct: false,
            optional: false,
            timeout_seconds: None,
            is_start_node: false,
            description: promise.description,
            position_x: promise.position_x,
            position_y: promise.position_y,
            state: NodeState::Idle,
            fingerprint: None,
            last_error: None,
        }
    }

    pub fn input_shape(&self) -> InputShape {
        self.kind.input_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_snake_case() {
        for kind in [
            NodeKind::ManualInput,
            NodeKind::GroupBy,
            NodeKind::PythonScript,
            NodeKind::CrossJoin,
        ] {
            assert_eq!(NodeKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(NodeKind::from_str("no_such_kind"), None);
    }

    #[test]
    fn shapes_match_kinds() {
        assert_eq!(NodeKind::Read.input_shape(), InputShape::Source);
        assert_eq!(NodeKind::Filter.input_shape(), InputShape::Single);
        assert_eq!(NodeKind::Join.input_shape(), InputShape::LeftRight);
        assert_eq!(NodeKind::Union.input_shape(), InputShape::Variadic);
    }

    #[test]
    fn left_right_rejects_main() {
        let shape = InputShape::LeftRight;
        assert!(!shape.accepts(InputSlot::Main));
        assert!(shape.accepts(InputSlot::Left));
        assert!(shape.accepts(InputSlot::Right));
    }

    #[test]
    fn source_accepts_nothing() {
        let shape = InputShape::Source;
        assert!(!shape.accepts(InputSlot::Main));
        assert!(!shape.accepts(InputSlot::Left));
    }

    #[test]
    fn promise_starts_incorrect() {
        let node = Node::from_promise(NodePromise {
            node_id: 7,
            kind: NodeKind::Filter,
            position_x: 10.0,
            position_y: 20.0,
            description: String::new(),
        });
        assert!(!node.is_correct);
        assert!(node.settings.is_none());
        assert!(node.fingerprint.is_none());
        assert_eq!(node.state, NodeState::Idle);
    }
}
