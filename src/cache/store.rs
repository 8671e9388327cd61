//! TTL cache persisted as a single collection in key-value storage.

use color_eyre::{eyre::eyre, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::codec;
use super::entry::{CacheEntry, CacheOptions, CacheStats};
use crate::clock::{Clock, SystemClock};
use crate::storage::KeyValueStorage;

/// Storage key holding the whole cache collection.
pub const CACHE_STORAGE_KEY: &str = "erp_cache";

type CacheMap = BTreeMap<String, CacheEntry>;

/// Best-effort cache with per-entry expiry, size limits and optional
/// compression.
///
/// No operation returns an error or panics: storage and serialization
/// failures are logged and reported as a miss, `false`, or zero. Each call
/// loads the full collection, mutates it and writes it back.
pub struct TtlCache<S: KeyValueStorage> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  defaults: CacheOptions,
}

impl<S: KeyValueStorage> TtlCache<S> {
  /// Create a cache over the given storage backend.
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
      defaults: CacheOptions::default(),
    }
  }

  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  /// Set the options used by [`TtlCache::put`].
  pub fn with_defaults(mut self, defaults: CacheOptions) -> Self {
    self.defaults = defaults;
    self
  }

  pub fn defaults(&self) -> CacheOptions {
    self.defaults
  }

  /// Store `value` under `key` using the configured default options.
  pub fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
    self.set(key, value, self.defaults)
  }

  /// Store `value` under `key`.
  ///
  /// Returns `false` when the serialized value is larger than
  /// `options.max_size_bytes` (the previous entry, if any, is kept) or when
  /// anything fails along the way.
  pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, options: CacheOptions) -> bool {
    match self.try_set(key, value, options) {
      Ok(stored) => stored,
      Err(e) => {
        warn!(key, error = %e, "Cache write failed");
        false
      }
    }
  }

  fn try_set<T: Serialize + ?Sized>(
    &self,
    key: &str,
    value: &T,
    options: CacheOptions,
  ) -> Result<bool> {
    let value = serde_json::to_value(value).map_err(|e| eyre!("Failed to serialize value: {}", e))?;
    let json = value.to_string();
    let size_bytes = json.len();

    if size_bytes > options.max_size_bytes {
      warn!(
        key,
        size_bytes,
        max_size_bytes = options.max_size_bytes,
        "Cache entry exceeds size limit, not cached"
      );
      return Ok(false);
    }

    let payload = if options.compress {
      Value::String(codec::compress(&json)?)
    } else {
      value
    };

    let mut map = self.load()?;
    map.insert(
      key.to_string(),
      CacheEntry {
        key: key.to_string(),
        payload,
        created_at: self.clock.now_ms(),
        ttl_ms: options.ttl_ms,
        size_bytes,
        compressed: options.compress,
      },
    );
    self.persist(&map)?;

    debug!(key, size_bytes, compressed = options.compress, "Cached entry");
    Ok(true)
  }

  /// Read and deserialize a cached value.
  ///
  /// A value that no longer deserializes into `T` is reported as a miss.
  pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
    let value = self.get_value(key)?;
    match serde_json::from_value(value) {
      Ok(data) => Some(data),
      Err(e) => {
        warn!(key, error = %e, "Cached value has unexpected shape");
        None
      }
    }
  }

  /// Read a cached value as JSON.
  ///
  /// Expired entries are evicted and reported as a miss. If a compressed
  /// payload cannot be decoded the stored payload is returned as-is.
  pub fn get_value(&self, key: &str) -> Option<Value> {
    match self.try_get_value(key) {
      Ok(value) => value,
      Err(e) => {
        warn!(key, error = %e, "Cache read failed");
        None
      }
    }
  }

  fn try_get_value(&self, key: &str) -> Result<Option<Value>> {
    let mut map = self.load()?;
    let now = self.clock.now_ms();

    let entry = match map.get(key) {
      Some(entry) => entry,
      None => return Ok(None),
    };

    if !entry.is_valid_at(now) {
      map.remove(key);
      if let Err(e) = self.persist(&map) {
        warn!(key, error = %e, "Failed to persist eviction of expired entry");
      }
      debug!(key, "Evicted expired cache entry");
      return Ok(None);
    }

    if !entry.compressed {
      return Ok(Some(entry.payload.clone()));
    }

    Ok(Some(decode_payload(key, &entry.payload)))
  }

  /// Remove an entry. Returns whether one was present.
  pub fn remove(&self, key: &str) -> bool {
    let result = self.load().and_then(|mut map| {
      if map.remove(key).is_none() {
        return Ok(false);
      }
      self.persist(&map)?;
      Ok(true)
    });

    result.unwrap_or_else(|e| {
      warn!(key, error = %e, "Cache remove failed");
      false
    })
  }

  /// Drop every entry.
  pub fn clear(&self) -> bool {
    match self.storage.remove(CACHE_STORAGE_KEY) {
      Ok(()) => true,
      Err(e) => {
        warn!(error = %e, "Cache clear failed");
        false
      }
    }
  }

  /// Evict all expired entries and return how many were removed.
  pub fn clean_expired(&self) -> usize {
    let result = self.load().and_then(|mut map| {
      let now = self.clock.now_ms();
      let before = map.len();
      map.retain(|_, entry| entry.is_valid_at(now));
      let removed = before - map.len();

      if removed > 0 {
        self.persist(&map)?;
      }
      Ok(removed)
    });

    match result {
      Ok(removed) => {
        debug!(removed, "Cleaned expired cache entries");
        removed
      }
      Err(e) => {
        warn!(error = %e, "Cache cleanup failed");
        0
      }
    }
  }

  /// Count and size of everything currently persisted, expired or not.
  pub fn stats(&self) -> CacheStats {
    match self.load() {
      Ok(map) => CacheStats {
        count: map.len(),
        total_size_bytes: map.values().map(|entry| entry.size_bytes).sum(),
        keys: map.keys().cloned().collect(),
      },
      Err(e) => {
        warn!(error = %e, "Failed to read cache stats");
        CacheStats::default()
      }
    }
  }

  /// Restart an entry's lifetime: `created_at` becomes now and the TTL is
  /// replaced.
  pub fn update_ttl(&self, key: &str, new_ttl_ms: i64) -> bool {
    let result = self.load().and_then(|mut map| {
      let Some(entry) = map.get_mut(key) else {
        return Ok(false);
      };
      entry.created_at = self.clock.now_ms();
      entry.ttl_ms = new_ttl_ms;
      self.persist(&map)?;
      Ok(true)
    });

    result.unwrap_or_else(|e| {
      warn!(key, error = %e, "Failed to update cache TTL");
      false
    })
  }

  /// Whether a fresh entry exists, without decoding it.
  pub fn has_valid(&self, key: &str) -> bool {
    match self.load() {
      Ok(map) => map
        .get(key)
        .is_some_and(|entry| entry.is_valid_at(self.clock.now_ms())),
      Err(e) => {
        warn!(key, error = %e, "Cache lookup failed");
        false
      }
    }
  }

  /// Read-through lookup.
  ///
  /// Returns the cached value when fresh, otherwise awaits `fetcher`, caches
  /// its result and returns it. Only fetcher errors reach the caller; a failed
  /// cache write just leaves the value uncached.
  pub async fn get_or_fetch<T, F, Fut>(
    &self,
    key: &str,
    options: CacheOptions,
    fetcher: F,
  ) -> Result<T>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    if let Some(cached) = self.get::<T>(key) {
      return Ok(cached);
    }

    let data = fetcher().await?;
    if !self.set(key, &data, options) {
      debug!(key, "Fetched value was not cached");
    }
    Ok(data)
  }

  fn load(&self) -> Result<CacheMap> {
    match self.storage.get(CACHE_STORAGE_KEY)? {
      Some(value) => {
        serde_json::from_value(value).map_err(|e| eyre!("Failed to deserialize cache: {}", e))
      }
      None => Ok(CacheMap::new()),
    }
  }

  fn persist(&self, map: &CacheMap) -> Result<()> {
    let value = serde_json::to_value(map).map_err(|e| eyre!("Failed to serialize cache: {}", e))?;
    self.storage.set(CACHE_STORAGE_KEY, &value)
  }
}

/// Decode a compressed payload, falling back to the raw payload.
fn decode_payload(key: &str, payload: &Value) -> Value {
  let decoded = payload
    .as_str()
    .ok_or_else(|| eyre!("compressed payload is not a string"))
    .and_then(|encoded| codec::decompress(encoded).map_err(|e| eyre!(e)))
    .and_then(|json| serde_json::from_str(&json).map_err(|e| eyre!(e)));

  match decoded {
    Ok(value) => value,
    Err(e) => {
      warn!(key, error = %e, "Failed to decode cached payload, returning raw value");
      payload.clone()
    }
  }
}

impl<S: KeyValueStorage> Clone for TtlCache<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      defaults: self.defaults,
    }
  }
}
