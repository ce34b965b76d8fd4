// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Errors raised by flow-graph mutations.
//!
//! A failed mutation never changes the graph: callers observe the same
//! topology before and after an `Err` return.

use thiserror::Error;

use crate::graph::{InputSlot, NodeId};

/// Invariant violations raised by graph mutations (connect, disconnect,
/// settings updates, deletion).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// Adding the edge would create a cycle in the flow graph.
    #[error("connecting {from} -> {to} would create a cycle")]
    CycleDetected { from: NodeId, to: NodeId },

    /// The target slot already has an incoming edge.
    #[error("node {node} already has an input on slot {slot:?}")]
    SlotOccupied { node: NodeId, slot: InputSlot },

    /// The edge does not fit the input shape declared by the node's kind.
    #[error("node {node} ({kind}) does not accept an input on slot {slot:?}")]
    ShapeMismatch {
        node: NodeId,
        kind: &'static str,
        slot: InputSlot,
    },

    /// A referenced node id does not exist in the flow.
    #[error("node {0} does not exist")]
    MissingNode(NodeId),

    /// The exact same edge is already present.
    #[error("edge {from} -> {to} on slot {slot:?} already exists")]
    DuplicateEdge {
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    },

    /// A disconnect referenced an edge that is not in the graph.
    #[error("edge {from} -> {to} on slot {slot:?} does not exist")]
    EdgeNotFound {
        from: NodeId,
        to: NodeId,
        slot: InputSlot,
    },

    /// The settings payload does not belong to the node's declared kind.
    #[error("settings payload is for kind '{got}', node {node} is '{expected}'")]
    KindMismatch {
        node: NodeId,
        expected: &'static str,
        got: &'static str,
    },

    /// The graph is locked because a run is in progress.
    #[error("flow is running; mutations are rejected until the run ends")]
    RunInProgress,

    /// A node id was reused for a new promise.
    #[error("node id {0} is already taken")]
    NodeIdTaken(NodeId),
}
