//! Canonical JSON rendering.
//!
//! The same logical value always renders to the same bytes: object keys are sorted
//! recursively, compact output has no whitespace, pretty output uses a two-space
//! indent. Signatures and equality-based diffs depend on this.

use crate::error::{PolicyError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{Map, Value};

/// Return a copy of `value` with every object's keys in sorted order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&object[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

pub fn to_compact(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&canonicalize(value))?)
}

pub fn to_pretty(value: &Value) -> Result<String> {
    Ok(serde_json::to_string_pretty(&canonicalize(value))?)
}

pub fn render(value: &Value, pretty: bool) -> Result<String> {
    if pretty {
        to_pretty(value)
    } else {
        to_compact(value)
    }
}

pub fn encode_base64(text: &str) -> String {
    STANDARD.encode(text.as_bytes())
}

pub fn decode_base64(text: &str) -> Result<String> {
    let bytes = STANDARD.decode(text.trim()).map_err(|e| {
        PolicyError::MalformedInput(format!("policy is not valid base64: {e}"))
    })?;
    String::from_utf8(bytes).map_err(|e| {
        PolicyError::MalformedInput(format!("policy is not valid utf-8: {e}"))
    })
}
