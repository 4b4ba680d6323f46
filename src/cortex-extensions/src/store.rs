//! Key/value settings persistence.
//!
//! The runtime keeps its extension registry and every extension's storage
//! namespace in a host [`SettingsStore`].

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::{ExtensionError, Result};

/// Settings key holding the persisted extension entries.
pub const REGISTRY_KEY: &str = "extensions.registry.v1";

/// Prefix of per-extension storage keys.
pub const STORAGE_KEY_PREFIX: &str = "extensions.storage.v1.";

/// Settings key of an extension's storage namespace.
pub fn storage_key(extension_id: &str) -> String {
    format!("{}{}", STORAGE_KEY_PREFIX, extension_id)
}

/// Host settings backend.
#[async_trait::async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory settings, lost on drop.
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    values: RwLock<BTreeMap<String, Value>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored.
    pub async fn keys(&self) -> Vec<String> {
        self.values.read().await.keys().cloned().collect()
    }
}

#[async_trait::async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.values.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.values.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.values.write().await.remove(key);
        Ok(())
    }
}

/// Settings kept in a single JSON document on disk.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, Value>>>,
}

impl JsonFileSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    /// Store at `<config dir>/cortex/extensions.json`.
    pub fn default_location() -> Result<Self> {
        default_settings_path()
            .map(Self::new)
            .ok_or_else(|| ExtensionError::Config("no user config directory available".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<BTreeMap<String, Value>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                ExtensionError::Storage(format!(
                    "corrupt settings file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_document(&self, document: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(document)?;

        // Write then rename so readers never see a partial file.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeMap<String, Value>),
    {
        let mut cache = self.cache.lock().await;
        let mut document = match cache.take() {
            Some(document) => document,
            None => self.read_document().await?,
        };
        f(&mut document);
        let written = self.write_document(&document).await;
        *cache = Some(document);
        written
    }
}

#[async_trait::async_trait]
impl SettingsStore for JsonFileSettingsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = Some(self.read_document().await?);
        }
        Ok(cache.as_ref().and_then(|doc| doc.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.update(|doc| {
            doc.insert(key.to_string(), value);
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.update(|doc| {
            doc.remove(key);
        })
        .await
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("cortex").join("extensions.json"))
}
