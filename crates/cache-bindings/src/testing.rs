//! In-memory asset store and scripted fetcher for binding tests

use asset_cache::{
    AssetCache, AssetEntry, AssetError, AssetFetcher, BinaryStore, FetchedAsset, LoadProgress,
    ProgressCallback, StoredAsset,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Default)]
pub struct MemoryStore {
    available: bool,
    assets: Mutex<HashMap<String, StoredAsset>>,
}

#[async_trait]
impl BinaryStore for MemoryStore {
    async fn probe(&self) -> bool {
        self.available
    }

    async fn init(&self) -> asset_cache::Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> asset_cache::Result<Option<StoredAsset>> {
        Ok(self.assets.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, asset: StoredAsset) -> asset_cache::Result<()> {
        self.assets
            .lock()
            .unwrap()
            .insert(asset.entry.key.clone(), asset);
        Ok(())
    }

    async fn remove(&self, key: &str) -> asset_cache::Result<()> {
        self.assets.lock().unwrap().remove(key);
        Ok(())
    }

    async fn entries(&self) -> asset_cache::Result<Vec<AssetEntry>> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .values()
            .map(|a| a.entry.clone())
            .collect())
    }

    async fn remove_older_than(&self, cutoff: DateTime<Utc>) -> asset_cache::Result<usize> {
        let mut assets = self.assets.lock().unwrap();
        let before = assets.len();
        assets.retain(|_, a| a.entry.timestamp >= cutoff);
        Ok(before - assets.len())
    }

    async fn clear(&self) -> asset_cache::Result<()> {
        self.assets.lock().unwrap().clear();
        Ok(())
    }
}

/// Serves canned bodies by URL; unknown URLs fail
#[derive(Default)]
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, (String, Bytes)>>,
    calls: AtomicUsize,
    gate: Option<Arc<Notify>>,
}

impl FakeFetcher {
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn ok(&self, url: &str, content_type: &str, body: &'static [u8]) {
        self.bodies.lock().unwrap().insert(
            url.to_string(),
            (content_type.to_string(), Bytes::from_static(body)),
        );
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &str,
        on_progress: Option<ProgressCallback>,
    ) -> asset_cache::Result<FetchedAsset> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let body = self.bodies.lock().unwrap().get(url).cloned();
        let (content_type, data) =
            body.ok_or_else(|| AssetError::Fetch(format!("no route to {}", url)))?;

        if let Some(report) = on_progress {
            let total = data.len() as u64;
            report(LoadProgress::new(total, Some(total)));
        }
        Ok(FetchedAsset { data, content_type })
    }
}

/// An initialized asset cache over an in-memory store
pub async fn media_cache(store_available: bool, fetcher: Arc<FakeFetcher>) -> Arc<AssetCache> {
    let store = MemoryStore {
        available: store_available,
        ..MemoryStore::default()
    };
    let cache = AssetCache::builder()
        .store(Arc::new(store))
        .fetcher(fetcher)
        .build()
        .unwrap();
    cache.init().await;
    Arc::new(cache)
}
