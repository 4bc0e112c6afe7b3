//! Binary asset storage

use crate::error::{AssetError, Result};
use crate::types::{AssetEntry, StoredAsset};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DATA_EXTENSION: &str = "bin";
const META_EXTENSION: &str = "meta";

/// A store for large binary payloads keyed by asset key
#[async_trait]
pub trait BinaryStore: Send + Sync {
    /// Check whether the store can be used at all
    async fn probe(&self) -> bool;

    /// Prepare the store after a successful probe
    async fn init(&self) -> Result<()>;

    /// Fetch an asset; invalid entries are evicted and reported as missing
    async fn get(&self, key: &str) -> Result<Option<StoredAsset>>;

    async fn put(&self, asset: StoredAsset) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Metadata for every stored asset, as of the call
    async fn entries(&self) -> Result<Vec<AssetEntry>>;

    /// Evict entries written before `cutoff`, returning how many were removed
    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}

#[derive(Default)]
struct StoreIndex {
    entries: HashMap<String, AssetEntry>,
    current_size: u64,
}

/// File-backed binary store with in-memory metadata
///
/// Each asset is a payload file plus a JSON metadata sidecar, so the index
/// can be rebuilt on restart. Writes, removals and sweeps all take the index
/// write lock for their whole duration, so a sweep never observes a
/// half-written entry.
pub struct FileBinaryStore {
    cache_dir: PathBuf,
    /// Maximum total payload size in bytes
    max_size: u64,
    index: RwLock<StoreIndex>,
}

impl FileBinaryStore {
    pub fn new(cache_dir: PathBuf, max_size: u64) -> Self {
        Self {
            cache_dir,
            max_size,
            index: RwLock::new(StoreIndex::default()),
        }
    }

    /// File stem for an asset key
    pub fn file_stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::file_stem(key), DATA_EXTENSION))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{}", Self::file_stem(key), META_EXTENSION))
    }

    async fn remove_locked(&self, index: &mut StoreIndex, key: &str) {
        if let Some(entry) = index.entries.remove(key) {
            index.current_size = index.current_size.saturating_sub(entry.size);
            let _ = fs::remove_file(self.data_path(key)).await;
            let _ = fs::remove_file(self.meta_path(key)).await;
        }
    }

    /// Evict a corrupt entry unless it was replaced since it was read
    async fn remove_if_unchanged(&self, seen: &AssetEntry) {
        let mut index = self.index.write().await;
        let unchanged = index
            .entries
            .get(&seen.key)
            .is_some_and(|e| e.timestamp == seen.timestamp && e.size == seen.size);
        if unchanged {
            self.remove_locked(&mut index, &seen.key).await;
        }
    }

    /// Evict oldest entries until `new_size` more bytes fit
    async fn evict_if_needed(&self, index: &mut StoreIndex, new_size: u64) {
        if index.current_size + new_size <= self.max_size {
            return;
        }

        let target_size = self.max_size.saturating_sub(new_size);

        while index.current_size > target_size {
            let oldest_key = index
                .entries
                .iter()
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(k, _)| k.clone());

            match oldest_key {
                Some(key) => {
                    self.remove_locked(index, &key).await;
                    debug!(key = %key, "Evicted oldest asset");
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl BinaryStore for FileBinaryStore {
    async fn probe(&self) -> bool {
        if let Err(e) = fs::create_dir_all(&self.cache_dir).await {
            warn!(cache_dir = ?self.cache_dir, error = %e, "Asset store directory unusable");
            return false;
        }
        let probe_path = self.cache_dir.join(".probe");
        match fs::write(&probe_path, b"probe").await {
            Ok(()) => {
                let _ = fs::remove_file(&probe_path).await;
                true
            }
            Err(e) => {
                warn!(cache_dir = ?self.cache_dir, error = %e, "Asset store directory not writable");
                false
            }
        }
    }

    async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;

        let mut index = StoreIndex::default();
        let mut dir = fs::read_dir(&self.cache_dir).await?;

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some(META_EXTENSION) {
                continue;
            }

            let entry = match fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<AssetEntry>(&bytes).ok(),
                Err(_) => None,
            };
            let Some(entry) = entry else {
                warn!(path = ?path, "Dropping unreadable asset metadata");
                let _ = fs::remove_file(&path).await;
                continue;
            };

            // The payload must exist and match the recorded size
            let on_disk = fs::metadata(self.data_path(&entry.key))
                .await
                .map(|m| m.len())
                .ok();
            if entry.size == 0 || on_disk != Some(entry.size) {
                warn!(key = %entry.key, "Dropping asset with missing or mismatched payload");
                let _ = fs::remove_file(&path).await;
                let _ = fs::remove_file(self.data_path(&entry.key)).await;
                continue;
            }

            index.current_size += entry.size;
            index.entries.insert(entry.key.clone(), entry);
        }

        info!(
            cache_dir = ?self.cache_dir,
            entries = index.entries.len(),
            size = index.current_size,
            "Asset store initialized"
        );
        *self.index.write().await = index;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<StoredAsset>> {
        // Reading under the index lock keeps a concurrent overwrite from
        // swapping the payload out from under us
        let (entry, read) = {
            let index = self.index.read().await;
            let Some(entry) = index.entries.get(key).cloned() else {
                return Ok(None);
            };
            let read = fs::read(self.data_path(key)).await;
            (entry, read)
        };

        let data = match read {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached asset, removing entry");
                self.remove_if_unchanged(&entry).await;
                return Ok(None);
            }
        };

        let asset = StoredAsset { entry, data };
        if !asset.is_valid() {
            warn!(
                key = %key,
                size = asset.entry.size,
                actual = asset.data.len(),
                "Evicting invalid asset entry"
            );
            self.remove_if_unchanged(&asset.entry).await;
            return Ok(None);
        }

        Ok(Some(asset))
    }

    async fn put(&self, asset: StoredAsset) -> Result<()> {
        if !asset.is_valid() {
            return Err(AssetError::EmptyPayload(asset.entry.url));
        }

        let key = asset.entry.key.clone();
        let size = asset.entry.size;
        let data_path = self.data_path(&key);
        let tmp_path = data_path.with_extension("tmp");
        let mut index = self.index.write().await;

        // The old entry stays intact if the new payload cannot be written
        fs::write(&tmp_path, &asset.data).await?;

        // An overwrite frees the old payload first
        self.remove_locked(&mut index, &key).await;
        self.evict_if_needed(&mut index, size).await;

        fs::rename(&tmp_path, &data_path).await?;
        fs::write(self.meta_path(&key), serde_json::to_vec(&asset.entry)?).await?;

        index.current_size += size;
        index.entries.insert(key.clone(), asset.entry);

        debug!(key = %key, size, "Stored asset");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut index = self.index.write().await;
        self.remove_locked(&mut index, key).await;
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<AssetEntry>> {
        Ok(self.index.read().await.entries.values().cloned().collect())
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut index = self.index.write().await;
        let expired: Vec<String> = index
            .entries
            .values()
            .filter(|e| e.timestamp < cutoff)
            .map(|e| e.key.clone())
            .collect();

        for key in &expired {
            self.remove_locked(&mut index, key).await;
        }

        Ok(expired.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut index = self.index.write().await;
        let keys: Vec<String> = index.entries.keys().cloned().collect();
        for key in &keys {
            self.remove_locked(&mut index, key).await;
        }
        Ok(())
    }
}
