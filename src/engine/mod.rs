// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The scheduler/runner: dependency-aware concurrent execution of a
//! planned flow, with caching, cancellation, timeouts and run stats.
//!
//! # Examples
//!
//! ## Running a flow with stub transforms
//! ```ignore
//! use std::sync::Arc;
//! use flowfile_core::cache::ResultCache;
//! use flowfile_core::engine::{stubs::stub_registry, FlowRunner, ProgressSink};
//! use tokio_util::sync::CancellationToken;
//!
//! let cache = Arc::new(ResultCache::new("/tmp/flowfile-cache", graph.flow_id()));
//! let runner = FlowRunner::new(cache, Arc::new(stub_registry()));
//! let info = runner
//!     .run(&mut graph, &[], CancellationToken::new(), ProgressSink::disabled())
//!     .await?;
//! assert!(info.success);
//! ```

mod context;
mod executor;
mod progress;
mod run_info;
mod scheduler;
mod transform;

pub mod stubs;

#[cfg(test)]
mod integration_tests;

pub use context::ExecutionContext;
pub use progress::{ProgressEvent, ProgressReceiver, ProgressSink};
pub use run_info::{NodeRunResult, RunInformation, SkipCause};
pub use scheduler::FlowRunner;
pub use transform::{NodeInputs, NodeTransform, TransformOutput, TransformRegistry};
