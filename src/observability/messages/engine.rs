// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Run lifecycle events.

use std::fmt::{Display, Formatter};

use crate::graph::FlowId;

use super::StructuredLog;

/// A run was planned and is about to execute.
pub struct RunStarted {
    pub flow_id: FlowId,
    pub node_count: usize,
    pub skipped: usize,
    pub max_parallel: usize,
}

impl Display for RunStarted {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Starting run of flow {}: {} node(s), {} skipped, max_parallel={}",
            self.flow_id, self.node_count, self.skipped, self.max_parallel
        )
    }
}

impl StructuredLog for RunStarted {
    fn log(&self) {
        tracing::info!(
            flow_id = self.flow_id,
            node_count = self.node_count,
            skipped = self.skipped,
            max_parallel = self.max_parallel,
            "{}",
            self
        );
    }
}

/// A run finished, successfully or not.
pub struct RunFinished {
    pub flow_id: FlowId,
    pub success: bool,
    pub nodes_completed: usize,
    pub elapsed_ms: u64,
}

impl Display for RunFinished {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Run of flow {} {} after {} ms: {} node(s) completed",
            self.flow_id,
            if self.success { "succeeded" } else { "failed" },
            self.elapsed_ms,
            self.nodes_completed
        )
    }
}

impl StructuredLog for RunFinished {
    fn log(&self) {
        tracing::info!(
            flow_id = self.flow_id,
            success = self.success,
            nodes_completed = self.nodes_completed,
            elapsed_ms = self.elapsed_ms,
            "{}",
            self
        );
    }
}
