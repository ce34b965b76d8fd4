// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Flow graph model: typed nodes, slotted edges, validation and topology.

mod flow;
mod node;
mod settings;

#[cfg(test)]
mod integration_tests;

pub use flow::{Edge, FlowGraph, SetSettingsError};
pub use node::{InputShape, InputSlot, Node, NodeKind, NodePromise, NodeState};
pub use settings::{
    AggKind, Aggregation, CacheSettings, ColumnSchema, CrossJoinSettings, FileFormat,
    FilterSettings, FormulaSettings, GroupBySettings, JoinHow, JoinSettings,
    ManualInputSettings, NodeSettings, OutputSettings, PivotSettings, PolarsCodeSettings,
    PythonScriptSettings, ReadSettings, RecordIdSettings, SelectColumn, SelectSettings,
    SortColumn, SortSettings, UnionMode, UnionSettings, UnpivotSettings, UserDefinedSettings,
    WriteMode,
};

/// Flow identifier, unique within a registry.
pub type FlowId = i64;

/// Node identifier, unique within a flow.
pub type NodeId = i64;
