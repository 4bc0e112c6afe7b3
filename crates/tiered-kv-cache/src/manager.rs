//! Tiered cache manager

use crate::backend::{FileBackend, MemoryBackend, SessionBackend, StorageBackend};
use crate::error::FetchError;
use crate::types::{CacheConfig, CacheEntry, CacheStats, StorageTier, TierStats, TieredCacheSettings};
use cache_primitives::{system_clock, Capabilities, Clock, InFlightRegistry};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Outcome of a de-duplicated fetch, shared by every waiter on the key
pub type FetchOutcome = std::result::Result<serde_json::Value, FetchError>;

/// Process-wide tiered cache
///
/// Construct once, [`init`](Self::init) to probe the durable tiers, share
/// behind an `Arc`, and [`dispose`](Self::dispose) on shutdown.
pub struct CacheManager {
    memory: Arc<dyn StorageBackend>,
    /// Durable tier candidates, probed at init
    durable: Vec<Arc<dyn StorageBackend>>,
    /// Tiers that passed their probe, fastest first; memory is always present
    active: RwLock<Vec<Arc<dyn StorageBackend>>>,
    capabilities: RwLock<Capabilities>,
    settings: TieredCacheSettings,
    clock: Arc<dyn Clock>,
    in_flight: InFlightRegistry<FetchOutcome>,
    disposed: AtomicBool,
}

/// Builder for [`CacheManager`] with replaceable backends and clock
pub struct CacheManagerBuilder {
    settings: TieredCacheSettings,
    memory: Option<Arc<dyn StorageBackend>>,
    session: Option<Arc<dyn StorageBackend>>,
    local: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
}

impl CacheManagerBuilder {
    pub fn settings(mut self, settings: TieredCacheSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn memory(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.memory = Some(backend);
        self
    }

    pub fn session(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.session = Some(backend);
        self
    }

    pub fn local(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.local = Some(backend);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> CacheManager {
        let settings = self.settings;

        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(MemoryBackend::new()));
        let session = self
            .session
            .unwrap_or_else(|| Arc::new(SessionBackend::new(settings.session_quota_bytes)));
        let local = self.local.or_else(|| {
            settings.local_dir.clone().map(|dir| {
                Arc::new(FileBackend::new(dir, settings.local_quota_bytes)) as Arc<dyn StorageBackend>
            })
        });

        let mut durable = vec![session];
        durable.extend(local);

        let mut capabilities = Capabilities::new();
        capabilities.record(memory.tier().backend_kind(), true);

        CacheManager {
            active: RwLock::new(vec![Arc::clone(&memory)]),
            memory,
            durable,
            capabilities: RwLock::new(capabilities),
            settings,
            clock: self.clock.unwrap_or_else(system_clock),
            in_flight: InFlightRegistry::new(),
            disposed: AtomicBool::new(false),
        }
    }
}

impl CacheManager {
    /// Create a cache manager with the default backends for `settings`
    pub fn new(settings: TieredCacheSettings) -> Self {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder {
            settings: TieredCacheSettings::default(),
            memory: None,
            session: None,
            local: None,
            clock: None,
        }
    }

    /// Probe the durable tiers once and activate the ones that work
    pub async fn init(&self) -> Capabilities {
        let mut active = vec![Arc::clone(&self.memory)];
        let mut capabilities = Capabilities::new();
        capabilities.record(self.memory.tier().backend_kind(), true);

        for backend in &self.durable {
            let tier = backend.tier();
            let available = if backend.probe().await {
                match backend.init().await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(tier = %tier, error = %e, "Storage tier failed to initialize");
                        false
                    }
                }
            } else {
                false
            };

            capabilities.record(tier.backend_kind(), available);
            if available {
                active.push(Arc::clone(backend));
            } else {
                warn!(tier = %tier, "Storage tier unavailable, continuing without it");
            }
        }

        // Fastest first, regardless of how the backends were supplied
        active.sort_by_key(|b| b.tier() as u8);

        *self.active.write().await = active;
        *self.capabilities.write().await = capabilities.clone();
        self.disposed.store(false, Ordering::SeqCst);

        info!(
            tiers = ?capabilities.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "Tiered cache initialized"
        );
        capabilities
    }

    /// Drop volatile state and stop serving
    pub async fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.in_flight.clear();
        if let Err(e) = self.memory.clear().await {
            warn!(error = %e, "Failed to clear memory tier on dispose");
        }
        info!("Tiered cache disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub async fn capabilities(&self) -> Capabilities {
        self.capabilities.read().await.clone()
    }

    /// Registry of fetches in flight through this cache, keyed by cache key
    pub fn in_flight(&self) -> &InFlightRegistry<FetchOutcome> {
        &self.in_flight
    }

    async fn active_tiers(&self) -> Vec<Arc<dyn StorageBackend>> {
        self.active.read().await.clone()
    }

    async fn backend_for(&self, tier: StorageTier) -> Option<Arc<dyn StorageBackend>> {
        self.active
            .read()
            .await
            .iter()
            .find(|b| b.tier() == tier)
            .cloned()
    }

    /// Look up `key`, honoring the configured version and ttl
    ///
    /// Returns the first valid hit, fastest tier first, and copies hits from
    /// slower tiers into memory. Version mismatch, expiry and corrupt entries
    /// are all misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, config: &CacheConfig) -> Option<T> {
        if self.is_disposed() {
            return None;
        }

        let now_ms = self.clock.now_ms();

        for backend in self.active_tiers().await {
            let tier = backend.tier();
            let raw = match backend.get(key).await {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Storage read failed");
                    continue;
                }
            };

            let entry: CacheEntry<serde_json::Value> = match serde_json::from_str(&raw) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Evicting corrupt cache entry");
                    let _ = backend.remove(key).await;
                    continue;
                }
            };

            if !config.version.matches(&entry.version) {
                debug!(key = %key, tier = %tier, stored = %entry.version, "Cache version mismatch");
                continue;
            }

            if !config.ignore_ttl && entry.is_expired(now_ms, config.ttl) {
                debug!(key = %key, tier = %tier, "Cache entry expired");
                continue;
            }

            let value = match serde_json::from_value::<T>(entry.value) {
                Ok(value) => value,
                Err(e) => {
                    warn!(key = %key, tier = %tier, error = %e, "Evicting undecodable cache entry");
                    let _ = backend.remove(key).await;
                    continue;
                }
            };

            if tier != StorageTier::Memory {
                if let Err(e) = self.memory.set(key, &raw).await {
                    debug!(key = %key, error = %e, "Promotion to memory failed");
                }
            }

            debug!(key = %key, tier = %tier, "Cache hit");
            return Some(value);
        }

        debug!(key = %key, "Cache miss");
        None
    }

    /// Store `value` under `key`
    ///
    /// Writes to the pinned tier, or by policy: small values get a copy in the
    /// default durable tier. Memory always holds the current value. Copies in
    /// other durable tiers are removed. A durable write that fails (quota or
    /// otherwise) degrades to memory only and is logged, never returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, config: &CacheConfig) {
        if self.is_disposed() {
            debug!(key = %key, "Ignoring write to disposed cache");
            return;
        }

        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Value not serializable, not caching");
                return;
            }
        };

        let entry = CacheEntry {
            key: key.to_string(),
            value,
            timestamp: self.clock.now_ms(),
            version: config.version.write_tag().to_string(),
            ttl: config.ttl.map(|ttl| ttl.as_millis() as u64),
        };
        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Entry not serializable, not caching");
                return;
            }
        };

        let target = config.storage.unwrap_or_else(|| self.default_tier(raw.len()));
        let mut written = None;

        if target != StorageTier::Memory {
            match self.backend_for(target).await {
                Some(backend) => match backend.set(key, &raw).await {
                    Ok(()) => written = Some(target),
                    Err(e) if e.is_quota_exceeded() => {
                        warn!(key = %key, tier = %target, error = %e, "Storage quota exceeded, falling back to memory");
                    }
                    Err(e) => {
                        warn!(key = %key, tier = %target, error = %e, "Storage write failed, falling back to memory");
                    }
                },
                None => {
                    debug!(key = %key, tier = %target, "Tier unavailable, storing in memory only");
                }
            }
        }

        for backend in self.active_tiers().await {
            let tier = backend.tier();
            if tier == StorageTier::Memory || Some(tier) == written {
                continue;
            }
            if let Err(e) = backend.remove(key).await {
                debug!(key = %key, tier = %tier, error = %e, "Failed to drop stale copy");
            }
        }

        if let Err(e) = self.memory.set(key, &raw).await {
            warn!(key = %key, error = %e, "Memory write failed");
        }

        debug!(key = %key, tier = %written.unwrap_or(StorageTier::Memory), "Cached value");
    }

    fn default_tier(&self, serialized_len: usize) -> StorageTier {
        if serialized_len <= self.settings.small_value_limit {
            self.settings.default_durable_tier
        } else {
            StorageTier::Memory
        }
    }

    /// Delete `key` from every tier
    pub async fn remove(&self, key: &str) {
        for backend in self.active_tiers().await {
            if let Err(e) = backend.remove(key).await {
                warn!(key = %key, tier = %backend.tier(), error = %e, "Failed to remove cache entry");
            }
        }
    }

    /// Remove every key starting with `prefix`, or everything when `None`
    pub async fn clear(&self, prefix: Option<&str>) {
        for backend in self.active_tiers().await {
            let tier = backend.tier();
            let result = match prefix {
                None => backend.clear().await,
                Some(prefix) => match backend.keys().await {
                    Ok(keys) => {
                        for key in keys.iter().filter(|k| k.starts_with(prefix)) {
                            let _ = backend.remove(key).await;
                        }
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            };
            if let Err(e) = result {
                warn!(tier = %tier, prefix = ?prefix, error = %e, "Failed to clear tier");
            }
        }
        info!(prefix = ?prefix, "Cache cleared");
    }

    /// Scan every live entry and aggregate counts, sizes and timestamps
    pub async fn get_stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        for backend in self.active_tiers().await {
            let tier = backend.tier();
            let keys = match backend.keys().await {
                Ok(keys) => keys,
                Err(e) => {
                    warn!(tier = %tier, error = %e, "Failed to list tier keys");
                    continue;
                }
            };

            let mut tier_stats = TierStats {
                tier,
                items: 0,
                size: 0,
            };

            for key in keys {
                let Ok(Some(raw)) = backend.get(&key).await else {
                    continue;
                };
                tier_stats.items += 1;
                tier_stats.size += raw.len() as u64;

                if let Some(written) = serde_json::from_str::<CacheEntry<serde_json::Value>>(&raw)
                    .ok()
                    .and_then(|e| e.written_at())
                {
                    stats.oldest_entry = Some(stats.oldest_entry.map_or(written, |o| o.min(written)));
                    stats.newest_entry = Some(stats.newest_entry.map_or(written, |n| n.max(written)));
                }
            }

            match tier {
                StorageTier::Memory => stats.memory_items = tier_stats.items,
                StorageTier::Session => stats.session_items = tier_stats.items,
                StorageTier::Local => stats.local_items = tier_stats.items,
            }
            stats.total_size += tier_stats.size;
            stats.tiers.push(tier_stats);
        }

        stats
    }

    /// Run `fetcher` for `key` (joining a fetch already in flight) and cache the result
    ///
    /// Auth failures are never cached, and any entry already held for the key
    /// is evicted so credential-dependent data is not served afterwards.
    pub async fn fetch_and_store<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        config: &CacheConfig,
        fetcher: F,
    ) -> std::result::Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let joined = self
            .in_flight
            .join_or_start(key, || self.fetch_pipeline(key, config, fetcher()));
        let value = joined.wait().await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Start a background refresh of `key` unless one is already in flight
    ///
    /// Returns whether a refresh was started. Failures are logged only.
    pub fn refresh_in_background<T, F, Fut>(
        self: &Arc<Self>,
        key: &str,
        config: &CacheConfig,
        fetcher: F,
    ) -> bool
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let started = self.in_flight.start_if_idle(key, || {
            let pipeline = self.fetch_pipeline(key, config, fetcher());
            let key = key.to_string();
            async move {
                let outcome = pipeline.await;
                if let Err(e) = &outcome {
                    warn!(key = %key, error = %e, "Background refresh failed");
                }
                outcome
            }
        });
        if started {
            debug!(key = %key, "Background refresh started");
        }
        started
    }

    fn fetch_pipeline<T, Fut>(
        self: &Arc<Self>,
        key: &str,
        config: &CacheConfig,
        fetch: Fut,
    ) -> impl Future<Output = FetchOutcome> + Send + 'static
    where
        T: Serialize + Send + 'static,
        Fut: Future<Output = std::result::Result<T, FetchError>> + Send + 'static,
    {
        let manager = Arc::clone(self);
        let key = key.to_string();
        let config = config.clone();

        async move {
            match fetch.await {
                Ok(value) => {
                    let value = serde_json::to_value(&value)?;
                    manager.set(&key, &value, &config).await;
                    Ok(value)
                }
                Err(e) if e.is_auth() => {
                    warn!(key = %key, error = %e, "Auth-dependent response not cached");
                    manager.remove(&key).await;
                    Err(e)
                }
                Err(e) => Err(e),
            }
        }
    }
}
