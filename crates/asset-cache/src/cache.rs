//! Asset cache service

use crate::error::{AssetError, Result};
use crate::fetcher::{AssetFetcher, HttpAssetFetcher};
use crate::key::{asset_key, request_url};
use crate::service_worker::{CacheTarget, ServiceWorkerBridge};
use crate::store::{BinaryStore, FileBinaryStore};
use crate::types::{
    AssetCacheSettings, AssetConfig, AssetEntry, AssetKind, AssetSource, AssetStats,
    ProgressCallback, StoredAsset,
};
use cache_primitives::{system_clock, BackendKind, Capabilities, Clock, InFlightRegistry};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

type StoreOutcome = Result<Option<StoredAsset>>;

/// Process-wide binary asset cache
pub struct AssetCache {
    store: Arc<dyn BinaryStore>,
    store_available: AtomicBool,
    fetcher: Arc<dyn AssetFetcher>,
    service_worker: ServiceWorkerBridge,
    cache_name: String,
    clock: Arc<dyn Clock>,
    /// Pending downloads by asset key; the outcome is the stored asset, or
    /// `None` when it could not be stored
    in_flight: InFlightRegistry<StoreOutcome>,
    capabilities: RwLock<Capabilities>,
    disposed: AtomicBool,
}

/// Builder for [`AssetCache`] with replaceable collaborators
pub struct AssetCacheBuilder {
    settings: AssetCacheSettings,
    store: Option<Arc<dyn BinaryStore>>,
    fetcher: Option<Arc<dyn AssetFetcher>>,
    service_worker: ServiceWorkerBridge,
    clock: Option<Arc<dyn Clock>>,
}

impl AssetCacheBuilder {
    pub fn settings(mut self, settings: AssetCacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn store(mut self, store: Arc<dyn BinaryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn service_worker(mut self, bridge: ServiceWorkerBridge) -> Self {
        self.service_worker = bridge;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<AssetCache> {
        let settings = self.settings;

        let store = self.store.unwrap_or_else(|| {
            Arc::new(FileBinaryStore::new(
                settings.cache_dir.clone(),
                settings.max_cache_size,
            ))
        });
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpAssetFetcher::new(settings.fetch_timeout)?),
        };

        Ok(AssetCache {
            store,
            store_available: AtomicBool::new(false),
            fetcher,
            service_worker: self.service_worker,
            cache_name: settings.cache_name,
            clock: self.clock.unwrap_or_else(system_clock),
            in_flight: InFlightRegistry::new(),
            capabilities: RwLock::new(Capabilities::new()),
            disposed: AtomicBool::new(false),
        })
    }
}

fn version_matches(entry: &AssetEntry, config: &AssetConfig) -> bool {
    match &config.version {
        Some(version) => entry.version.as_ref() == Some(version),
        None => true,
    }
}

impl AssetCache {
    pub fn builder() -> AssetCacheBuilder {
        AssetCacheBuilder {
            settings: AssetCacheSettings::default(),
            store: None,
            fetcher: None,
            service_worker: ServiceWorkerBridge::unavailable(),
            clock: None,
        }
    }

    /// Create an asset cache with the default store and HTTP fetcher
    pub fn new(settings: AssetCacheSettings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    /// Probe the binary store and service worker once
    ///
    /// Without a usable store every request passes through to the network URL.
    pub async fn init(&self) -> Capabilities {
        let available = if self.store.probe().await {
            match self.store.init().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Asset store failed to initialize");
                    false
                }
            }
        } else {
            false
        };
        self.store_available.store(available, Ordering::SeqCst);
        self.disposed.store(false, Ordering::SeqCst);

        let mut capabilities = Capabilities::new();
        capabilities.record(BackendKind::BinaryStore, available);
        capabilities.record(
            BackendKind::ServiceWorkerCache,
            self.service_worker.is_available(),
        );
        *self.capabilities.write().await = capabilities.clone();

        if !available {
            warn!("Asset store unavailable, serving network URLs only");
        }
        info!(
            store = available,
            service_worker = self.service_worker.is_available(),
            "Asset cache initialized"
        );
        capabilities
    }

    /// Stop caching; pending downloads finish but can no longer be joined
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.in_flight.clear();
        info!("Asset cache disposed");
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.capabilities.read().await.clone()
    }

    fn store_ready(&self) -> bool {
        self.store_available.load(Ordering::SeqCst) && !self.disposed.load(Ordering::SeqCst)
    }

    /// Registry of downloads in flight, keyed by asset key
    pub fn in_flight(&self) -> &InFlightRegistry<StoreOutcome> {
        &self.in_flight
    }

    pub async fn cache_image(
        self: &Arc<Self>,
        url: &str,
        config: &AssetConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<AssetSource> {
        self.cache_asset(url, AssetKind::Image, config, on_progress)
            .await
    }

    pub async fn cache_video(
        self: &Arc<Self>,
        url: &str,
        config: &AssetConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<AssetSource> {
        self.cache_asset(url, AssetKind::Video, config, on_progress)
            .await
    }

    /// Resolve `url` to a loadable source, caching its bytes
    ///
    /// A fresh cached copy is returned at once. With `stale_while_revalidate`
    /// any copy of the requested version is returned at once, fresh or not,
    /// and refreshed in the background. Otherwise the asset is downloaded and
    /// stored before returning. If that fails, a stale cached copy is served;
    /// failing that, `fallback_url` is tried the same way.
    pub async fn cache_asset(
        self: &Arc<Self>,
        url: &str,
        kind: AssetKind,
        config: &AssetConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<AssetSource> {
        let primary_error = match self.resolve(url, kind, config, on_progress).await {
            Ok(source) => return Ok(source),
            Err(e) => e,
        };

        match config.fallback_url.as_deref() {
            Some(fallback) if fallback != url => {
                warn!(url = %url, fallback = %fallback, error = %primary_error, "Asset unavailable, trying fallback");
                let fallback_config = AssetConfig {
                    fallback_url: None,
                    ..config.clone()
                };
                self.resolve(fallback, kind, &fallback_config, None).await
            }
            _ => Err(primary_error),
        }
    }

    async fn resolve(
        self: &Arc<Self>,
        url: &str,
        kind: AssetKind,
        config: &AssetConfig,
        on_progress: Option<ProgressCallback>,
    ) -> Result<AssetSource> {
        if !self.store_ready() {
            return Ok(AssetSource::Network {
                url: request_url(url, kind, config),
            });
        }

        let key = asset_key(url, kind, config);
        let existing = match self.store.get(&key).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(key = %key, error = %e, "Asset store read failed");
                None
            }
        };

        // A version mismatch invalidates the copy; age alone only makes it stale
        if let Some(asset) = existing.as_ref().filter(|a| version_matches(&a.entry, config)) {
            let fresh = self.within_max_age(&asset.entry, config);
            if fresh || config.stale_while_revalidate {
                if config.stale_while_revalidate {
                    self.revalidate(&key, url, kind, config);
                }
                debug!(key = %key, fresh, "Asset cache hit");
                return Ok(AssetSource::from_stored(asset));
            }
            debug!(key = %key, "Cached asset is stale");
        }

        let joined = self.in_flight.join_or_start(&key, || {
            self.download_and_store(&key, url, kind, config, on_progress)
        });

        match joined.wait().await {
            Ok(Some(stored)) => Ok(AssetSource::from_stored(&stored)),
            Ok(None) => Ok(AssetSource::Network {
                url: request_url(url, kind, config),
            }),
            Err(e) if e.is_unauthorized() => Err(e),
            Err(e) => match existing {
                Some(stale) => {
                    warn!(key = %key, error = %e, "Asset fetch failed, serving stale copy");
                    Ok(AssetSource::from_stored(&stale))
                }
                None => Err(e),
            },
        }
    }

    fn within_max_age(&self, entry: &AssetEntry, config: &AssetConfig) -> bool {
        match config.max_age {
            Some(max_age) => {
                let age = self.clock.now() - entry.timestamp;
                age.to_std().map(|age| age <= max_age).unwrap_or(true)
            }
            None => true,
        }
    }

    fn revalidate(self: &Arc<Self>, key: &str, url: &str, kind: AssetKind, config: &AssetConfig) {
        let started = self.in_flight.start_if_idle(key, || {
            let download = self.download_and_store(key, url, kind, config, None);
            let key = key.to_string();
            async move {
                let outcome = download.await;
                if let Err(e) = &outcome {
                    warn!(key = %key, error = %e, "Background asset refresh failed");
                }
                outcome
            }
        });
        if started {
            debug!(key = %key, "Background asset refresh started");
        }
    }

    fn download_and_store(
        self: &Arc<Self>,
        key: &str,
        url: &str,
        kind: AssetKind,
        config: &AssetConfig,
        on_progress: Option<ProgressCallback>,
    ) -> impl Future<Output = StoreOutcome> + Send + 'static {
        let cache = Arc::clone(self);
        let key = key.to_string();
        let url = url.to_string();
        let fetch_url = request_url(&url, kind, config);
        let version = config.version.clone();

        async move {
            let fetched = match cache.fetcher.fetch(&fetch_url, on_progress).await {
                Ok(fetched) => fetched,
                Err(e) if e.is_unauthorized() => {
                    warn!(key = %key, error = %e, "Auth-dependent asset not cached");
                    let _ = cache.store.remove(&key).await;
                    return Err(e);
                }
                Err(e) => return Err(e),
            };

            if fetched.data.is_empty() {
                return Err(AssetError::EmptyPayload(fetch_url));
            }

            let asset = StoredAsset {
                entry: AssetEntry {
                    key: key.clone(),
                    kind: AssetKind::classify(&fetched.content_type, &url, kind),
                    url,
                    content_type: fetched.content_type,
                    size: fetched.data.len() as u64,
                    timestamp: cache.clock.now(),
                    version,
                },
                data: fetched.data,
            };

            if !cache.store_ready() {
                debug!(key = %key, "Asset store gone, not storing");
                return Ok(None);
            }

            match cache.store.put(asset.clone()).await {
                Ok(()) => {
                    debug!(key = %key, size = asset.entry.size, kind = %asset.entry.kind, "Cached asset");
                    Ok(Some(asset))
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Failed to store asset");
                    Ok(None)
                }
            }
        }
    }

    /// Metadata for every stored asset, read from the store at call time
    pub async fn get_all_entries(&self) -> Result<Vec<AssetEntry>> {
        if !self.store_ready() {
            return Ok(Vec::new());
        }
        self.store.entries().await
    }

    /// Evict every asset written before `older_than`
    pub async fn cleanup_old_entries(&self, older_than: DateTime<Utc>) -> Result<usize> {
        if !self.store_ready() {
            return Ok(0);
        }
        let removed = self.store.remove_older_than(older_than).await?;
        info!(removed, cutoff = %older_than, "Cleaned up old assets");
        Ok(removed)
    }

    /// Evict every stored asset and the service worker's copy of this cache
    pub async fn clear_cache(&self) -> Result<()> {
        if self.store_ready() {
            self.store.clear().await?;
        }
        self.service_worker
            .clear_cache(CacheTarget::Named(self.cache_name.clone()));
        info!(cache = %self.cache_name, "Asset cache cleared");
        Ok(())
    }

    /// Evict every stored asset and ask the service worker to drop all its caches
    pub async fn clear_all_assets(&self) -> Result<()> {
        if self.store_ready() {
            self.store.clear().await?;
        }
        self.service_worker.clear_cache(CacheTarget::All);
        info!("All asset caches cleared");
        Ok(())
    }

    /// Ask a waiting service worker to take over immediately
    pub fn activate_update(&self) {
        self.service_worker.skip_waiting();
    }

    pub async fn stats(&self) -> Result<AssetStats> {
        let entries = self.get_all_entries().await?;
        Ok(AssetStats::from_entries(&entries))
    }
}
