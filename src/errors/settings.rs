// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use thiserror::Error;

/// A single structural validation failure for a node's settings.
///
/// Validation errors are structured (field path + reason) so callers can
/// attach them to the offending field in a UI instead of parsing free-form
/// strings. Validation never mutates the graph; an invalid payload leaves
/// the node marked incorrect and the previous settings in place.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{path}: {reason}")]
pub struct SettingsError {
    /// Dotted path of the offending field, e.g. `join.how`.
    pub path: String,
    /// Human-readable reason the field failed validation.
    pub reason: String,
}

impl SettingsError {
    pub fn new(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
