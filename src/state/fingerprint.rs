use serde_json::Value;
use sha2::{Digest, Sha256};

/// Deterministic SHA-256 of a JSON document, independent of object key order.
pub fn hash_config(config: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(config, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    format!("{:x}", digest)
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
                write_canonical(&map[key], out);
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
