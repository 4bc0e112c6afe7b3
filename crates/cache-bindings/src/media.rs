//! Cached image and video binding
//!
//! A load resolves the asset through the asset cache and publishes the
//! source. Cached bytes are available at once, so `loading` clears as soon as
//! the source is published. A network source stays `loading` until the
//! consumer calls [`CachedMedia::mark_loaded`] or the timeout fires.
//!
//! Bindings for the same asset share one download. Progress goes only to
//! the binding whose load started that download; a binding that joins it
//! sees no progress, just the final source.

use asset_cache::{
    AssetCache, AssetConfig, AssetError, AssetKind, AssetSource, LoadProgress, ProgressCallback,
};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

pub const DEFAULT_MEDIA_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct MediaOptions {
    pub url: String,
    pub kind: AssetKind,
    pub config: AssetConfig,
    /// Longest a load may stay `loading` before it is forced clear
    pub timeout: Duration,
}

impl MediaOptions {
    pub fn new(url: impl Into<String>, kind: AssetKind) -> Self {
        Self {
            url: url.into(),
            kind,
            config: AssetConfig::default(),
            timeout: DEFAULT_MEDIA_TIMEOUT,
        }
    }

    pub fn with_config(mut self, config: AssetConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaState {
    pub source: Option<AssetSource>,
    pub loading: bool,
    pub error: Option<AssetError>,
    /// Latest download progress; stays `None` when this binding joined a
    /// download another binding started
    pub progress: Option<LoadProgress>,
    /// The source is backed by cached bytes
    pub cached: bool,
    pub timed_out: bool,
}

impl MediaState {
    /// Value for the element's `src` attribute
    pub fn src(&self) -> Option<String> {
        self.source.as_ref().map(AssetSource::src)
    }
}

struct MediaInner {
    assets: Arc<AssetCache>,
    options: MediaOptions,
    state: watch::Sender<MediaState>,
    mount_started: AtomicBool,
    mounted: AtomicBool,
    /// Incremented per load; updates from older loads are dropped
    generation: AtomicU64,
    renders: AtomicUsize,
}

impl MediaInner {
    fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }

    /// Apply `modify` if still mounted and, when given, `generation` is current
    fn update(&self, generation: Option<u64>, modify: impl FnOnce(&mut MediaState) -> bool) -> bool {
        if !self.is_mounted() {
            return false;
        }
        if generation.is_some_and(|g| g != self.generation.load(Ordering::SeqCst)) {
            return false;
        }
        let changed = self.state.send_if_modified(modify);
        if changed {
            self.renders.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }

    async fn load(self: &Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.update(None, |state| {
            state.loading = true;
            state.error = None;
            state.progress = None;
            state.timed_out = false;
            true
        });
        self.arm_timeout(generation);

        let on_progress: ProgressCallback = {
            let inner = Arc::clone(self);
            Arc::new(move |progress| {
                inner.update(Some(generation), |state| {
                    state.progress = Some(progress);
                    true
                });
            })
        };

        let options = &self.options;
        let result = self
            .assets
            .cache_asset(&options.url, options.kind, &options.config, Some(on_progress))
            .await;

        match result {
            Ok(source) => {
                let cached = source.is_cached();
                debug!(url = %options.url, cached, "Media source resolved");
                self.update(Some(generation), |state| {
                    state.source = Some(source);
                    state.cached = cached;
                    if cached {
                        state.loading = false;
                    }
                    true
                });
            }
            Err(e) => {
                warn!(url = %options.url, error = %e, "Media failed to load");
                self.update(Some(generation), |state| {
                    state.error = Some(e);
                    state.loading = false;
                    true
                });
            }
        }
    }

    fn arm_timeout(self: &Arc<Self>, generation: u64) {
        let inner = Arc::clone(self);
        let timeout = self.options.timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let fired = inner.update(Some(generation), |state| {
                if !state.loading {
                    return false;
                }
                state.loading = false;
                state.timed_out = true;
                true
            });
            if fired {
                warn!(
                    url = %inner.options.url,
                    timeout_ms = timeout.as_millis() as u64,
                    "Media load timed out"
                );
            }
        });
    }
}

/// One consumer's view of a cached image or video
#[derive(Clone)]
pub struct CachedMedia {
    inner: Arc<MediaInner>,
}

impl CachedMedia {
    pub fn new(assets: Arc<AssetCache>, options: MediaOptions) -> Self {
        let (state, _) = watch::channel(MediaState::default());
        Self {
            inner: Arc::new(MediaInner {
                assets,
                options,
                state,
                mount_started: AtomicBool::new(false),
                mounted: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                renders: AtomicUsize::new(0),
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<MediaState> {
        self.inner.state.subscribe()
    }

    pub fn snapshot(&self) -> MediaState {
        self.inner.state.borrow().clone()
    }

    pub fn render_count(&self) -> usize {
        self.inner.renders.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.is_mounted()
    }

    /// Start loading; only the first call does anything
    pub async fn mount(&self) {
        if self.inner.mount_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.mounted.store(true, Ordering::SeqCst);
        self.inner.load().await;
    }

    /// Clear the error and load again
    pub async fn retry(&self) {
        if !self.is_mounted() {
            return;
        }
        debug!(url = %self.inner.options.url, "Retrying media load");
        self.inner.load().await;
    }

    /// The element finished loading a network source
    pub fn mark_loaded(&self) {
        self.inner.update(None, |state| {
            if !state.loading {
                return false;
            }
            state.loading = false;
            true
        });
    }

    pub fn unmount(&self) {
        self.inner.mounted.store(false, Ordering::SeqCst);
    }
}
