// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Structural fingerprints for nodes and their upstream lineage.
//!
//! A node's fingerprint is a SHA-256 digest over its kind, a canonical
//! encoding of its settings, and the sorted fingerprints of its direct
//! inputs. Two graphs that are semantically identical therefore produce
//! identical fingerprints regardless of insertion order, and any edit to
//! a node changes the fingerprint of the node and every descendant.
//!
//! Fingerprints are the cache key for every intermediate result: matching
//! fingerprint means the cached result is valid, full stop.
//!
//! # Examples
//!
//! ```
//! use flowfile_core::fingerprint::{node_fingerprint, Digest};
//!
//! let input = Digest::of_bytes(b"upstream-lineage");
//! let a = node_fingerprint("filter", br#"{"predicate":"a > 1"}"#, &[input]);
//! let b = node_fingerprint("filter", br#"{"predicate":"a > 1"}"#, &[input]);
//! let c = node_fingerprint("filter", br#"{"predicate":"a > 2"}"#, &[input]);
//! assert_eq!(a, b);
//! assert_ne!(a, c);
//! ```

mod canonical;
mod digest;
mod locks;

pub use canonical::{canonical_bytes, CanonicalError};
pub use digest::Digest;
pub use locks::FingerprintLocks;

use sha2::{Digest as _, Sha256};

/// Version byte folded into every fingerprint input. Bump when the
/// canonical encoding changes so stale cache entries can never collide
/// with entries produced by a newer encoding.
pub const FINGERPRINT_VERSION: u8 = 1;

/// Compute a node fingerprint from its kind, canonical settings bytes and
/// the fingerprints of its direct inputs.
///
/// Input digests are sorted before hashing so the result depends only on
/// the *set* of upstream lineages, not on edge insertion order. Slot
/// identity (left vs right) is already part of each input's lineage via
/// the settings of the consuming node, so no slot tag is folded here.
pub fn node_fingerprint(kind: &str, settings_bytes: &[u8], inputs: &[Digest]) -> Digest {
    let mut sorted: Vec<&Digest> = inputs.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update([FINGERPRINT_VERSION]);
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update((settings_bytes.len() as u64).to_le_bytes());
    hasher.update(settings_bytes);
    for input in sorted {
        hasher.update(input.as_bytes());
    }
    Digest::from(hasher.finalize())
}

/// Metadata of a file referenced by a root node (`read`, `manual_input`
/// with file backing). Folded into the canonical settings bytes so an
/// external file change invalidates the whole downstream chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStamp {
    pub path: String,
    pub mtime_ms: i64,
    pub size: u64,
}

impl FileStamp {
    /// Stat a file on disk. Returns `None` when the file is missing; the
    /// caller decides whether that is an error (readers) or acceptable
    /// (not-yet-written outputs).
    pub fn from_path(path: &str) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Some(Self {
            path: path.to_string(),
            mtime_ms,
            size: meta.len(),
        })
    }

    /// Stable cache-key form, `path:mtime:size`.
    pub fn to_key(&self) -> String {
        format!("{}:{}:{}", self.path, self.mtime_ms, self.size)
    }
}
