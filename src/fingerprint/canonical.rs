// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Canonical byte encoding for settings payloads.
//!
//! Fingerprints must be stable across process restarts, serde versions and
//! map iteration order, so settings are rendered through an explicit
//! writer instead of trusting `serde_json::to_vec`: object keys are
//! emitted in lexicographic order. Non-finite floats are forbidden in
//! settings; validation rejects them before they ever reach this encoder
//! (`serde_json::Number` cannot represent them).

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("settings are not serializable: {0}")]
    Serialize(String),
}

/// Encode any serializable settings value to canonical bytes.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalError> {
    let value =
        serde_json::to_value(value).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
    let mut out = Vec::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

fn write_value(value: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalError> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => out.extend_from_slice(n.to_string().as_bytes()),
        Value::String(s) => {
            // serde_json's string escaping is already deterministic.
            let encoded =
                serde_json::to_string(s).map_err(|e| CanonicalError::Serialize(e.to_string()))?;
            out.extend_from_slice(encoded.as_bytes());
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let encoded = serde_json::to_string(key)
                    .map_err(|e| CanonicalError::Serialize(e.to_string()))?;
                out.extend_from_slice(encoded.as_bytes());
                out.push(b':');
                write_value(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}
