//! Deterministic cache key derivation.
//!
//! Parameters are serialized to JSON, object keys sorted at every level, and
//! the compact canonical form hashed with SHA-256 truncated to 128 bits.
//!
//! ```
//! use error_insights::cache::{derive_key, stable_hash};
//! use serde_json::json;
//!
//! let a = stable_hash(&json!({"limit": 10, "offset": 0})).unwrap();
//! let b = stable_hash(&json!({"offset": 0, "limit": 10})).unwrap();
//! assert_eq!(a, b);
//! assert_eq!(a.len(), 32);
//!
//! let key = derive_key("search", &json!({"offset": 0})).unwrap();
//! assert!(key.starts_with("search:"));
//! ```

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Digest width in bytes (128-bit keys)
const DIGEST_BYTES: usize = 16;

/// Render a JSON value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
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

/// Hash a parameter set into 32 hex chars, independent of key order.
pub fn stable_hash<P: Serialize + ?Sized>(params: &P) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(params)?;
    let digest = Sha256::digest(canonical_json(&value).as_bytes());
    Ok(hex::encode(&digest[..DIGEST_BYTES]))
}

/// `"<namespace>:<stable_hash(params)>"`
pub fn derive_key<P: Serialize + ?Sized>(namespace: &str, params: &P) -> Result<String, serde_json::Error> {
    Ok(format!("{}:{}", namespace, stable_hash(params)?))
}
