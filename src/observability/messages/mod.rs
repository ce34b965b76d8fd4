// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Message types per subsystem.
//!
//! * `engine` - run lifecycle events
//! * `worker` - dispatch and recovery events
//! * `kernel` - kernel lifecycle events

pub mod engine;
pub mod kernel;
pub mod worker;

/// Emit the message with structured fields at its intrinsic level.
pub trait StructuredLog {
    fn log(&self);
}
