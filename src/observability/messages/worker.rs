// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Worker dispatch and recovery events.

use std::fmt::{Display, Formatter};

use super::StructuredLog;

/// The streaming connection dropped mid-task; recovery over the REST
/// status endpoint is starting.
pub struct TaskRecovering<'a> {
    pub task_id: &'a str,
    pub reason: &'a str,
}

impl Display for TaskRecovering<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker stream dropped for task '{}' ({}); recovering via status endpoint",
            self.task_id, self.reason
        )
    }
}

impl StructuredLog for TaskRecovering<'_> {
    fn log(&self) {
        tracing::warn!(task_id = self.task_id, reason = self.reason, "{}", self);
    }
}

/// The worker refused a submission because its pool is saturated; a
/// single retry follows after backoff.
pub struct CapacityRetry<'a> {
    pub task_id: &'a str,
}

impl Display for CapacityRetry<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Worker at capacity for task '{}'; retrying once after backoff",
            self.task_id
        )
    }
}

impl StructuredLog for CapacityRetry<'_> {
    fn log(&self) {
        tracing::warn!(task_id = self.task_id, "{}", self);
    }
}
