//! In-process storage backend.

use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use super::KeyValueStorage;

/// Storage that keeps everything in memory and loses it on drop.
///
/// Used for tests and for running without a data directory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
  values: Mutex<HashMap<String, Value>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

impl KeyValueStorage for MemoryStorage {
  fn get(&self, key: &str) -> Result<Option<Value>> {
    let values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(values.get(key).cloned())
  }

  fn set(&self, key: &str, value: &Value) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.insert(key.to_string(), value.clone());
    Ok(())
  }

  fn remove(&self, key: &str) -> Result<()> {
    let mut values = self
      .values
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    values.remove(key);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_set_get_remove() {
    let storage = MemoryStorage::new();
    assert_eq!(storage.get("a").unwrap(), None);

    storage.set("a", &json!({"n": 1})).unwrap();
    assert_eq!(storage.get("a").unwrap(), Some(json!({"n": 1})));

    storage.remove("a").unwrap();
    storage.remove("a").unwrap();
    assert_eq!(storage.get("a").unwrap(), None);
  }
}
