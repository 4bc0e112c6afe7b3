//! Shared cache services handed to every binding

use crate::content::{CachedContent, ContentOptions};
use crate::media::{CachedMedia, MediaOptions};
use asset_cache::{AssetCache, AssetConfig, AssetKind};
use cache_primitives::Capabilities;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use tiered_kv_cache::CacheManager;
use tracing::info;

/// The process-wide cache services
#[derive(Clone)]
pub struct CacheContext {
    pub cache: Arc<CacheManager>,
    pub assets: Arc<AssetCache>,
}

impl CacheContext {
    pub fn new(cache: Arc<CacheManager>, assets: Arc<AssetCache>) -> Self {
        Self { cache, assets }
    }

    /// Initialize both services and return the union of their capabilities
    pub async fn init(&self) -> Capabilities {
        let mut capabilities = self.cache.init().await;
        for kind in self.assets.init().await.iter() {
            capabilities.record(kind, true);
        }
        info!(
            backends = ?capabilities.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            "Cache context ready"
        );
        capabilities
    }

    pub async fn dispose(&self) {
        self.cache.dispose().await;
        self.assets.dispose().await;
    }

    /// Bind a content consumer to this context
    pub fn content<T>(&self, options: ContentOptions<T>) -> CachedContent<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        CachedContent::new(Arc::clone(&self.cache), options)
    }

    pub fn video(&self, url: impl Into<String>, config: AssetConfig) -> CachedMedia {
        CachedMedia::new(
            Arc::clone(&self.assets),
            MediaOptions::new(url, AssetKind::Video).with_config(config),
        )
    }

    pub fn image(&self, url: impl Into<String>, config: AssetConfig) -> CachedMedia {
        CachedMedia::new(
            Arc::clone(&self.assets),
            MediaOptions::new(url, AssetKind::Image).with_config(config),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentPhase;
    use crate::testing::{media_cache, FakeFetcher};
    use cache_primitives::BackendKind;
    use tiered_kv_cache::{FetchError, TieredCacheSettings};

    async fn context(store_available: bool, fetcher: Arc<FakeFetcher>) -> CacheContext {
        let cache = Arc::new(CacheManager::new(TieredCacheSettings {
            local_dir: None,
            ..TieredCacheSettings::default()
        }));
        CacheContext::new(cache, media_cache(store_available, fetcher).await)
    }

    #[tokio::test]
    async fn test_init_reports_union_of_capabilities() {
        let ctx = context(true, Arc::new(FakeFetcher::default())).await;
        let caps = ctx.init().await;

        assert!(caps.has(BackendKind::Memory));
        assert!(caps.has(BackendKind::SessionDurable));
        assert!(!caps.has(BackendKind::LocalDurable));
        assert!(caps.has(BackendKind::BinaryStore));
        assert!(!caps.has(BackendKind::ServiceWorkerCache));
    }

    #[tokio::test]
    async fn test_bindings_share_the_context_services() {
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher.ok("https://cdn.example.com/hero.mp4", "video/mp4", b"hero");
        let ctx = context(true, fetcher).await;
        ctx.init().await;

        let content = ctx.content(ContentOptions::new("CONTENT", || async {
            Ok::<_, FetchError>(vec!["welcome".to_string()])
        }));
        content.mount().await;
        assert_eq!(content.snapshot().phase, ContentPhase::Success);

        let cached: Option<Vec<String>> = ctx
            .cache
            .get("CONTENT", &tiered_kv_cache::CacheConfig::default())
            .await;
        assert_eq!(cached, Some(vec!["welcome".to_string()]));

        let video = ctx.video("https://cdn.example.com/hero.mp4", AssetConfig::default());
        video.mount().await;
        assert!(video.snapshot().cached);
        assert_eq!(ctx.assets.stats().await.unwrap().videos, 1);
    }

    #[tokio::test]
    async fn test_disposed_context_serves_nothing() {
        let ctx = context(true, Arc::new(FakeFetcher::default())).await;
        ctx.init().await;
        ctx.cache
            .set("CONTENT", &1u32, &tiered_kv_cache::CacheConfig::default())
            .await;

        ctx.dispose().await;
        let value: Option<u32> = ctx
            .cache
            .get("CONTENT", &tiered_kv_cache::CacheConfig::default())
            .await;
        assert!(value.is_none());
        assert!(ctx.assets.get_all_entries().await.unwrap().is_empty());
    }
}
