//! Persistence adapters for the current session record
//!
//! The manager persists two logical keys per instance: the JSON-serialized
//! session under `SESSION_DATA` and an RFC 3339 timestamp under
//! `LAST_ACTIVITY`. Both adapters here implement the generic
//! `KeyValueStore` seam from `teller-core`, so the same manager logic can
//! later sit on a remote cache or database row.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use teller_core::{KeyValueStore, StoreError};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Store key for the JSON-serialized current session
pub const KEY_SESSION_DATA: &str = "SESSION_DATA";
/// Store key for the RFC 3339 last-activity timestamp
pub const KEY_LAST_ACTIVITY: &str = "LAST_ACTIVITY";

/// In-memory adapter for tests and single-process deployments
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// File-backed adapter, one file per key under a directory
pub struct FileStore {
    storage_dir: PathBuf,
}

impl FileStore {
    /// Create the adapter, creating the directory if needed
    pub fn new<P: AsRef<Path>>(storage_dir: P) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&storage_dir)?;
        info!(dir = %storage_dir.display(), "File store initialized");
        Ok(Self { storage_dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::read(key, e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        tokio::fs::write(&path, value)
            .await
            .map_err(|e| StoreError::write(key, e.to_string()))?;
        debug!(key, path = %path.display(), "Wrote store entry");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::delete(key, e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_get_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get(KEY_SESSION_DATA).await.unwrap(), None);

        store.set(KEY_SESSION_DATA, "{\"a\":1}").await.unwrap();
        assert_eq!(
            store.get(KEY_SESSION_DATA).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );

        store.delete(KEY_SESSION_DATA).await.unwrap();
        assert_eq!(store.get(KEY_SESSION_DATA).await.unwrap(), None);
        // Deleting an absent key is not an error
        store.delete(KEY_SESSION_DATA).await.unwrap();
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = FileStore::new(dir.path()).unwrap();
            store
                .set(KEY_LAST_ACTIVITY, "2026-08-25T09:00:00Z")
                .await
                .unwrap();
        }
        let store = FileStore::new(dir.path()).unwrap();
        assert_eq!(
            store.get(KEY_LAST_ACTIVITY).await.unwrap().as_deref(),
            Some("2026-08-25T09:00:00Z")
        );

        store.delete(KEY_LAST_ACTIVITY).await.unwrap();
        assert_eq!(store.get(KEY_LAST_ACTIVITY).await.unwrap(), None);
        store.delete(KEY_LAST_ACTIVITY).await.unwrap();
    }
}
