//! Durable key-value storage that the cache and the sync queue persist into.
//!
//! Both consumers treat a storage key as one unit of durability: they read the
//! whole collection stored under it, mutate it, and write it back. Storage
//! backends only need synchronous get/set/remove of JSON values.
//!
//! Backends assume a single writer context. Two processes mutating the same
//! collection concurrently can lose updates.

mod memory;
mod sqlite;

use color_eyre::Result;
use serde_json::Value;

pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

/// Trait for persistent key-value backends.
pub trait KeyValueStorage: Send + Sync {
  /// Read the value stored under `key`, `None` if absent.
  fn get(&self, key: &str) -> Result<Option<Value>>;

  /// Store `value` under `key`, replacing any previous value.
  fn set(&self, key: &str, value: &Value) -> Result<()>;

  /// Remove `key`. Removing a missing key is not an error.
  fn remove(&self, key: &str) -> Result<()>;
}
