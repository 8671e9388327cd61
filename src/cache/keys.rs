//! Cache key derivation for parameterised reads.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derive a stable cache key from a base key and request parameters.
///
/// Parameters are serialized with object keys sorted, so two parameter sets
/// that differ only in field order map to the same key. Empty or null
/// parameters yield the base key unchanged.
pub fn create_cache_key<P: Serialize + ?Sized>(base_key: &str, params: &P) -> String {
  let value = match serde_json::to_value(params) {
    Ok(value) => value,
    Err(e) => {
      tracing::warn!(base_key, error = %e, "Failed to serialize cache key params");
      return base_key.to_string();
    }
  };

  if is_empty_params(&value) {
    return base_key.to_string();
  }

  // serde_json maps are ordered by key, so this rendering is canonical
  let canonical = value.to_string();

  // SHA256 hash for stable, fixed-length keys
  let mut hasher = Sha256::new();
  hasher.update(canonical.as_bytes());
  format!("{}:{}", base_key, hex::encode(hasher.finalize()))
}

fn is_empty_params(value: &Value) -> bool {
  match value {
    Value::Null => true,
    Value::Object(map) => map.is_empty(),
    Value::Array(items) => items.is_empty(),
    _ => false,
  }
}
