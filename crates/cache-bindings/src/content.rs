//! Cached content binding
//!
//! Mounting reads the cache once. A hit is published in a single update with
//! `from_cache` set, and with `background_refresh` the value is re-fetched
//! into the cache without touching the rendered data. A miss fetches through
//! the cache manager, which de-duplicates concurrent fetches per key; if the
//! fetch fails, any cached version of any age is rendered before the error
//! is surfaced.

use futures::future::{BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tiered_kv_cache::{CacheConfig, CacheManager, FetchError};
use tokio::sync::watch;
use tracing::{debug, warn};

pub type ContentFetcher<T> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;
pub type SuccessCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Where a content binding is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentPhase {
    /// Not mounted yet
    Idle,
    /// Rendered from the cache
    Hit,
    /// Waiting on the fetcher
    Fetching,
    /// Rendered from a fresh fetch
    Success,
    /// The fetch failed; rendered from an older cached copy
    StaleFallback,
    /// The fetch failed and nothing was cached
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContentState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<FetchError>,
    pub from_cache: bool,
    pub phase: ContentPhase,
}

impl<T> Default for ContentState<T> {
    fn default() -> Self {
        Self {
            data: None,
            loading: false,
            error: None,
            from_cache: false,
            phase: ContentPhase::Idle,
        }
    }
}

pub struct ContentOptions<T> {
    pub cache_key: String,
    pub fetcher: ContentFetcher<T>,
    pub config: CacheConfig,
    /// Re-fetch into the cache after a hit
    pub background_refresh: bool,
    pub on_error: Option<ErrorCallback>,
    pub on_success: Option<SuccessCallback<T>>,
}

impl<T: Send + 'static> ContentOptions<T> {
    pub fn new<F, Fut>(cache_key: impl Into<String>, fetcher: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        Self {
            cache_key: cache_key.into(),
            fetcher: Arc::new(move || fetcher().boxed()),
            config: CacheConfig::default(),
            background_refresh: false,
            on_error: None,
            on_success: None,
        }
    }

    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_background_refresh(mut self, enabled: bool) -> Self {
        self.background_refresh = enabled;
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&FetchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }
}

struct ContentInner<T> {
    cache: Arc<CacheManager>,
    options: ContentOptions<T>,
    state: watch::Sender<ContentState<T>>,
    mount_started: AtomicBool,
    mounted: AtomicBool,
    renders: AtomicUsize,
}

/// One consumer's view of a cached value
pub struct CachedContent<T> {
    inner: Arc<ContentInner<T>>,
}

impl<T> Clone for CachedContent<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> CachedContent<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(cache: Arc<CacheManager>, options: ContentOptions<T>) -> Self {
        let (state, _) = watch::channel(ContentState::default());
        Self {
            inner: Arc::new(ContentInner {
                cache,
                options,
                state,
                mount_started: AtomicBool::new(false),
                mounted: AtomicBool::new(false),
                renders: AtomicUsize::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ContentState<T>> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> ContentState<T> {
        self.inner.state.borrow().clone()
    }

    /// Number of state updates published so far
    pub fn render_count(&self) -> usize {
        self.inner.renders.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.load(Ordering::SeqCst)
    }

    pub fn cache_key(&self) -> &str {
        &self.inner.options.cache_key
    }

    /// Read the cache and fetch on a miss; only the first call does anything
    pub async fn mount(&self) {
        if self.inner.mount_started.swap(true, Ordering::SeqCst) {
            debug!(key = %self.cache_key(), "Already mounted");
            return;
        }
        self.inner.mounted.store(true, Ordering::SeqCst);

        let options = &self.inner.options;
        match self.inner.cache.get::<T>(&options.cache_key, &options.config).await {
            Some(data) => {
                debug!(key = %options.cache_key, "Rendering cached content");
                self.publish(|state| {
                    state.data = Some(data);
                    state.from_cache = true;
                    state.loading = false;
                    state.error = None;
                    state.phase = ContentPhase::Hit;
                });

                if options.background_refresh {
                    let fetcher = Arc::clone(&options.fetcher);
                    self.inner.cache.refresh_in_background(
                        &options.cache_key,
                        &options.config,
                        move || fetcher(),
                    );
                }
            }
            None => self.load().await,
        }
    }

    /// Fetch again regardless of what is cached
    pub async fn refresh(&self) {
        if !self.is_mounted() {
            return;
        }
        self.load().await;
    }

    /// Drop the cached value; rendered data stays until the next load
    pub async fn clear_cache(&self) {
        self.inner.cache.remove(self.cache_key()).await;
        self.publish(|state| state.from_cache = false);
    }

    /// Stop publishing; pending fetches still complete and fill the cache
    pub fn unmount(&self) {
        if self.inner.mounted.swap(false, Ordering::SeqCst) {
            debug!(key = %self.cache_key(), "Unmounted");
        }
    }

    async fn load(&self) {
        let options = &self.inner.options;
        let key = &options.cache_key;

        self.publish(|state| {
            state.loading = true;
            state.error = None;
            state.phase = ContentPhase::Fetching;
        });

        let fetcher = Arc::clone(&options.fetcher);
        let result: Result<T, FetchError> = self
            .inner
            .cache
            .fetch_and_store(key, &options.config, move || fetcher())
            .await;

        match result {
            Ok(data) => {
                if !self.is_mounted() {
                    debug!(key = %key, "Fetch finished after unmount");
                    return;
                }
                if let Some(on_success) = &options.on_success {
                    on_success(&data);
                }
                self.publish(|state| {
                    state.data = Some(data);
                    state.from_cache = false;
                    state.loading = false;
                    state.phase = ContentPhase::Success;
                });
            }
            Err(e) => {
                let stale = self
                    .inner
                    .cache
                    .get::<T>(key, &options.config.stale_fallback())
                    .await;

                match stale {
                    Some(data) => {
                        warn!(key = %key, error = %e, "Fetch failed, rendering stale content");
                        self.publish(|state| {
                            state.data = Some(data);
                            state.from_cache = true;
                            state.loading = false;
                            state.phase = ContentPhase::StaleFallback;
                        });
                    }
                    None => {
                        warn!(key = %key, error = %e, "Fetch failed with nothing cached");
                        if !self.is_mounted() {
                            return;
                        }
                        if let Some(on_error) = &options.on_error {
                            on_error(&e);
                        }
                        self.publish(|state| {
                            state.error = Some(e);
                            state.loading = false;
                            state.phase = ContentPhase::Error;
                        });
                    }
                }
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ContentState<T>)) {
        if !self.is_mounted() {
            return;
        }
        self.inner.state.send_modify(update);
        self.inner.renders.fetch_add(1, Ordering::SeqCst);
    }
}
