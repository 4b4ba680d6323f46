//! Per-extension key/value storage.
//!
//! Each extension's keys live in one JSON object under
//! `extensions.storage.v1.<id>`, so uninstalling clears it with one remove.

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::store::{SettingsStore, storage_key};
use crate::{ExtensionError, Result};

/// Storage namespace of a single extension.
///
/// Clones share one write lock, so concurrent writes through the same
/// namespace never drop each other's keys.
#[derive(Clone)]
pub struct ExtensionStorage {
    key: String,
    store: Arc<dyn SettingsStore>,
    write_lock: Arc<Mutex<()>>,
}

impl ExtensionStorage {
    pub fn new(extension_id: &str, store: Arc<dyn SettingsStore>) -> Self {
        Self {
            key: storage_key(extension_id),
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Settings key backing this namespace.
    pub fn settings_key(&self) -> &str {
        &self.key
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        match self.store.get(&self.key).await? {
            None | Some(Value::Null) => Ok(Map::new()),
            Some(Value::Object(map)) => Ok(map),
            Some(other) => Err(ExtensionError::Storage(format!(
                "expected an object at '{}', found {}",
                self.key, other
            ))),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.load().await?.remove(key))
    }

    pub async fn set(&self, key: &str, value: Value) -> Result<()> {
        if key.is_empty() {
            return Err(ExtensionError::validation("Storage key must not be empty"));
        }
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.store.set(&self.key, Value::Object(map)).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.store.set(&self.key, Value::Object(map)).await?;
        }
        Ok(())
    }

    pub async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.keys().cloned().collect())
    }

    /// Drop the whole namespace.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(&self.key).await
    }
}

impl std::fmt::Debug for ExtensionStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionStorage")
            .field("key", &self.key)
            .finish()
    }
}
