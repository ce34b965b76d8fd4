// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structured log message types.
//!
//! Operational events are modelled as small structs with a `Display`
//! impl (human-readable line) and a [`messages::StructuredLog`] impl
//! (machine-readable fields), so the wording lives in one place instead
//! of being scattered through format strings.

pub mod messages;
