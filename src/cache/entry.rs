//! Cache entry records and write options.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Default time-to-live for cache writes (5 minutes).
pub const DEFAULT_TTL_MS: i64 = 5 * 60 * 1000;

/// Default per-entry size limit (1 MiB of serialized JSON).
pub const DEFAULT_MAX_SIZE_BYTES: usize = 1024 * 1024;

/// A single cached value as persisted in the cache collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
  pub key: String,
  /// Raw JSON value, or an encoded string when `compressed` is set
  pub payload: Value,
  /// When the entry was written (ms since epoch)
  pub created_at: i64,
  pub ttl_ms: i64,
  /// Size of the serialized value at write time
  pub size_bytes: usize,
  pub compressed: bool,
}

impl CacheEntry {
  /// Moment the entry stops being valid.
  pub fn expires_at(&self) -> i64 {
    self.created_at.saturating_add(self.ttl_ms)
  }

  pub fn is_valid_at(&self, now_ms: i64) -> bool {
    now_ms < self.expires_at()
  }
}

/// Options for a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
  pub ttl_ms: i64,
  pub max_size_bytes: usize,
  pub compress: bool,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      ttl_ms: DEFAULT_TTL_MS,
      max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
      compress: false,
    }
  }
}

impl CacheOptions {
  pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
    self.ttl_ms = ttl_ms;
    self
  }

  pub fn with_max_size_bytes(mut self, max_size_bytes: usize) -> Self {
    self.max_size_bytes = max_size_bytes;
    self
  }

  pub fn with_compression(mut self, compress: bool) -> Self {
    self.compress = compress;
    self
  }
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
  pub count: usize,
  pub total_size_bytes: usize,
  pub keys: Vec<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_validity_boundary() {
    let entry = CacheEntry {
      key: "k".to_string(),
      payload: Value::Null,
      created_at: 1_000,
      ttl_ms: 500,
      size_bytes: 4,
      compressed: false,
    };

    assert!(entry.is_valid_at(1_499));
    assert!(!entry.is_valid_at(1_500));
  }
}
