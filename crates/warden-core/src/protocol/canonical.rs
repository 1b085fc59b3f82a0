// ============================================
// File: crates/warden-core/src/protocol/canonical.rs
// ============================================
//! # Canonical Signing Input
//!
//! ## Creation Reason
//! Signer and verifier must produce byte-identical input from the same
//! command, regardless of how either side's JSON library orders keys.
//!
//! ## Rules
//! - Envelope is `{"type":..,"payload":..,"timestamp":..,"nonce":..}` in
//!   exactly that order
//! - Object keys inside `payload` are sorted lexicographically at every depth
//! - Compact output, arrays keep their order, strings use JSON escaping
//!
//! ## Last Modified
//! v0.1.0 - Initial canonical form

use serde_json::Value;

use warden_common::Timestamp;

/// Produces the deterministic compact JSON form of `value`.
#[must_use]
pub fn canonicalize(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        // Scalars already have a single compact rendering.
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Builds the exact bytes a signed command's signature covers.
#[must_use]
pub fn signing_input(command_type: &str, payload: &Value, timestamp: Timestamp, nonce: &str) -> Vec<u8> {
    let mut out = String::from("{\"type\":");
    out.push_str(&Value::String(command_type.to_string()).to_string());
    out.push_str(",\"payload\":");
    write_canonical(payload, &mut out);
    out.push_str(",\"timestamp\":");
    out.push_str(&timestamp.as_millis().to_string());
    out.push_str(",\"nonce\":");
    out.push_str(&Value::String(nonce.to_string()).to_string());
    out.push('}');
    out.into_bytes()
}
