// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or saving flow files.
#[derive(Error, Debug)]
pub enum FlowFileError {
    #[error("flow file not found: {0}")]
    NotFound(PathBuf),

    #[error("unsupported flow file extension '{0}' (expected .yaml, .yml or .json)")]
    UnsupportedExtension(String),

    /// Pickle `.flowfile` archives are a legacy Python-specific format;
    /// they cannot be decoded here and must be converted to YAML/JSON
    /// first.
    #[error("'{0}' is a legacy pickle flow file; convert it to YAML or JSON before importing")]
    LegacyPickle(PathBuf),

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// The file parsed but describes an invalid graph (cycles, missing
    /// node references, bad settings).
    #[error("flow file {path} is invalid: {message}")]
    Invalid { path: PathBuf, message: String },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
