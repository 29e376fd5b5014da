//! Content-addressed tool identity.
//!
//! `toolHash` covers only identity-significant fields — name, server,
//! input/output schema, annotations — and deliberately excludes anything
//! timestamp-like, so the same tool definition always hashes the same way
//! regardless of when it was discovered.

use serde::Serialize;
use serde_json::Value;

use crate::annotations::ToolAnnotations;

#[derive(Serialize)]
struct HashInput<'a> {
    name: &'a str,
    server_name: &'a str,
    input_schema: &'a Value,
    output_schema: &'a Value,
    annotations: &'a ToolAnnotations,
}

/// `serde_json::Map` is backed by a `BTreeMap` in this crate's configuration
/// (the `preserve_order` feature is not enabled), so key order in the
/// serialized bytes is always the sorted order — this is what makes the
/// hash deterministic across re-enumeration.
pub fn tool_hash(
    name: &str,
    server_name: &str,
    input_schema: &Value,
    output_schema: &Value,
    annotations: &ToolAnnotations,
) -> String {
    let input = HashInput {
        name,
        server_name,
        input_schema,
        output_schema,
        annotations,
    };
    let bytes = serde_json::to_vec(&input).expect("HashInput serialization cannot fail");
    blake3::hash(&bytes).to_hex().to_string()
}

/// Hashes the sorted list of per-tool hashes for a server — a cheap
/// "did anything change here?" probe that doesn't require diffing tools.
pub fn server_tools_hash(tool_hashes: &[String]) -> String {
    let mut sorted: Vec<&str> = tool_hashes.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    for h in sorted {
        hasher.update(h.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_inputs_produce_same_hash() {
        let schema = json!({"type": "object"});
        let annotations = ToolAnnotations::default();
        let a = tool_hash("status", "git", &schema, &Value::Null, &annotations);
        let b = tool_hash("status", "git", &schema, &Value::Null, &annotations);
        assert_eq!(a, b);
    }

    #[test]
    fn different_schema_changes_hash() {
        let annotations = ToolAnnotations::default();
        let a = tool_hash("status", "git", &json!({"type": "object"}), &Value::Null, &annotations);
        let b = tool_hash(
            "status",
            "git",
            &json!({"type": "object", "properties": {"x": {}}}),
            &Value::Null,
            &annotations,
        );
        assert_ne!(a, b);
    }

    #[test]
    fn different_server_changes_hash_even_with_same_name() {
        let schema = json!({"type": "object"});
        let annotations = ToolAnnotations::default();
        let a = tool_hash("status", "git", &schema, &Value::Null, &annotations);
        let b = tool_hash("status", "docker", &schema, &Value::Null, &annotations);
        assert_ne!(a, b);
    }

    #[test]
    fn server_tools_hash_is_order_independent() {
        let a = server_tools_hash(&["h1".to_string(), "h2".to_string()]);
        let b = server_tools_hash(&["h2".to_string(), "h1".to_string()]);
        assert_eq!(a, b);
    }
}
