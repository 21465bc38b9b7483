//! Canonical hasher.
//!
//! SHA-256 over a serialization with object keys sorted at every level, so
//! the digest does not depend on key order or whitespace, nor on which side
//! produced the document. Callers sanitize first.

use serde_json::Value;
use sha2::{Digest, Sha256};

use flowsync_core::WorkflowDocument;

/// Hex SHA-256 of the canonical form of `doc`.
pub fn hash_document(doc: &WorkflowDocument) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(doc.as_value()).as_bytes());
    hex::encode(hasher.finalize())
}

/// Compact JSON with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        }
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
        scalar => out.push_str(&scalar.to_string()),
    }
}
