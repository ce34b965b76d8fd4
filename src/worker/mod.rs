// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Worker dispatch: streaming WebSocket protocol for out-of-process
//! dataframe materialisation, with a REST fallback for recovery.

mod client;
mod protocol;

#[cfg(test)]
mod integration_tests;

pub use client::WorkerClient;
pub use protocol::{
    task_id_for, ClientFrame, Operation, ResultType, SubmitQuery, TaskMeta, TaskState,
    TaskStatus, WorkerFrame, WorkerResult,
};
