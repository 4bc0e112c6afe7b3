//! File-backed local tier that survives restarts

use super::{ensure_fits, quota_cost, StorageBackend};
use crate::error::Result;
use crate::types::StorageTier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const RECORD_EXTENSION: &str = "json";

/// On-disk form of one key/value pair
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    value: String,
}

#[derive(Default)]
struct LocalIndex {
    /// Key -> quota cost of the stored pair
    costs: HashMap<String, u64>,
    used: u64,
}

/// Local tier: one file per key under `dir`, with a byte quota
pub struct FileBackend {
    dir: PathBuf,
    quota_bytes: u64,
    index: RwLock<LocalIndex>,
}

impl FileBackend {
    pub fn new(dir: PathBuf, quota_bytes: u64) -> Self {
        Self {
            dir,
            quota_bytes,
            index: RwLock::new(LocalIndex::default()),
        }
    }

    /// File name for a key: SHA-256 hex, so arbitrary keys are path-safe
    fn file_name(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        format!("{}.{}", hex::encode(hasher.finalize()), RECORD_EXTENSION)
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(Self::file_name(key))
    }

    async fn read_record(&self, path: &Path) -> Result<StoredRecord> {
        let bytes = fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::Local
    }

    async fn probe(&self) -> bool {
        if self.quota_bytes == 0 {
            return false;
        }
        if let Err(e) = fs::create_dir_all(&self.dir).await {
            warn!(dir = ?self.dir, error = %e, "Local storage directory unusable");
            return false;
        }
        let probe_path = self.dir.join(".probe");
        match fs::write(&probe_path, b"probe").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe_path).await;
                true
            }
            Err(e) => {
                warn!(dir = ?self.dir, error = %e, "Local storage directory not writable");
                false
            }
        }
    }

    /// Rebuild the key index from the records on disk
    async fn init(&self) -> Result<()> {
        let mut index = LocalIndex::default();
        let mut dir = fs::read_dir(&self.dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.read_record(&path).await {
                Ok(record) => {
                    let cost = quota_cost(&record.key, &record.value);
                    index.used += cost;
                    index.costs.insert(record.key, cost);
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Dropping unreadable local record");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }

        info!(
            dir = ?self.dir,
            entries = index.costs.len(),
            used = index.used,
            "Local storage initialized"
        );
        *self.index.write().await = index;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if !self.index.read().await.costs.contains_key(key) {
            return Ok(None);
        }

        match self.read_record(&self.path_for(key)).await {
            Ok(record) if record.key == key => Ok(Some(record.value)),
            Ok(record) => {
                warn!(key = %key, found = %record.key, "Local record key mismatch");
                Ok(None)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Failed to read local record");
                Err(e)
            }
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut index = self.index.write().await;
        let old_cost = index.costs.get(key).copied().unwrap_or(0);
        let new_cost = quota_cost(key, value);

        ensure_fits(StorageTier::Local, self.quota_bytes, index.used, old_cost, new_cost)?;

        let record = StoredRecord {
            key: key.to_string(),
            value: value.to_string(),
        };
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        fs::rename(&tmp, &path).await?;

        index.costs.insert(key.to_string(), new_cost);
        index.used = index.used - old_cost + new_cost;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut index = self.index.write().await;
        if let Some(cost) = index.costs.remove(key) {
            index.used -= cost;
            let _ = fs::remove_file(self.path_for(key)).await;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.index.read().await.costs.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        for key in index.costs.keys() {
            let _ = fs::remove_file(self.path_for(key)).await;
        }
        *index = LocalIndex::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn ready_backend(dir: PathBuf, quota: u64) -> FileBackend {
        let backend = FileBackend::new(dir, quota);
        assert!(backend.probe().await);
        backend.init().await.unwrap();
        backend
    }

    #[test]
    fn test_file_name_is_hashed() {
        let name = FileBackend::file_name("products_?q=shoes&page=2");
        assert_eq!(name.len(), 64 + 1 + RECORD_EXTENSION.len());
        assert!(name.ends_with(".json"));
        assert_ne!(name, FileBackend::file_name("products_?q=shoes&page=3"));
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let backend = ready_backend(dir.path().to_path_buf(), 1024 * 1024).await;
            backend.set("CONTENT", "{\"a\":1}").await.unwrap();
        }

        let reopened = ready_backend(dir.path().to_path_buf(), 1024 * 1024).await;
        assert_eq!(
            reopened.get("CONTENT").await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(reopened.keys().await.unwrap(), vec!["CONTENT"]);
    }

    #[tokio::test]
    async fn test_quota_rejects_large_value() {
        let dir = tempdir().unwrap();
        let backend = ready_backend(dir.path().to_path_buf(), 1024).await;

        let big = "x".repeat(2048);
        let err = backend.set("big", &big).await.unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(backend.get("big").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let dir = tempdir().unwrap();
        let backend = ready_backend(dir.path().to_path_buf(), 1024 * 1024).await;

        backend.set("a", "1").await.unwrap();
        backend.set("b", "2").await.unwrap();
        backend.remove("a").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
        assert_eq!(backend.keys().await.unwrap(), vec!["b"]);

        backend.clear().await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());

        let reopened = ready_backend(dir.path().to_path_buf(), 1024 * 1024).await;
        assert!(reopened.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_dropped_on_init() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.json", "0".repeat(64))), b"not json").unwrap();

        let backend = ready_backend(dir.path().to_path_buf(), 1024).await;
        assert!(backend.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_probe_fails_for_unwritable_dir() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        let backend = FileBackend::new(file.join("kv"), 1024);
        assert!(!backend.probe().await);
    }
}
