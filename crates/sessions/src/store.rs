//! Key-value persistence used for crash recovery.
//!
//! Every component receives an `Arc<dyn Store>` at construction. Values are
//! plain JSON; the typed helpers [`load`] and [`save`] handle (de)serialization.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use cg_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Keys
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const SEED_KEY: &str = "seed";
pub const WALLET_INDICES_KEY: &str = "wallet_indices";
pub const SESSIONS_KEY: &str = "sessions";

/// Key under which a session's subscription list is persisted.
pub fn subscriptions_key(identity: &str) -> String {
    format!("subscriptions:{identity}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Durable key-value store. Writes to distinct keys may run concurrently.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;
    async fn set(&self, key: &str, value: Value) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read `key` and deserialize it. A missing key yields `None`.
pub async fn load<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize `value` and write it under `key`.
pub async fn save<T: Serialize + ?Sized>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    store.set(key, serde_json::to_value(value)?).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Volatile store, used by tests and `--ephemeral` runs.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().insert(key.to_owned(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Store backed by a single JSON object on disk.
///
/// Reads are served from memory. Each write rewrites the whole file via a
/// temp file and rename, so a crash leaves either the old or the new
/// contents, never a torn file. Writers are serialized so the on-disk
/// snapshot never goes backwards.
pub struct FileStore {
    path: PathBuf,
    entries: tokio::sync::Mutex<HashMap<String, Value>>,
}

impl FileStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let entries: HashMap<String, Value> = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            if raw.trim().is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| Error::Store(format!("parsing {}: {e}", path.display())))?
            }
        } else {
            HashMap::new()
        };

        tracing::info!(
            keys = entries.len(),
            path = %path.display(),
            "file store opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            entries: tokio::sync::Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_snapshot(&self, entries: &HashMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(entries)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, json)?;
            std::fs::rename(&tmp, &path)
        })
        .await
        .map_err(|e| Error::Store(format!("write task failed: {e}")))?
        .map_err(|e| Error::Store(format!("writing {}: {e}", self.path.display())))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let previous = entries.insert(key.to_owned(), value);
        if let Err(e) = self.write_snapshot(&entries).await {
            // Keep memory in step with what is on disk.
            match previous {
                Some(v) => entries.insert(key.to_owned(), v),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let Some(previous) = entries.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.write_snapshot(&entries).await {
            entries.insert(key.to_owned(), previous);
            return Err(e);
        }
        Ok(())
    }
}
