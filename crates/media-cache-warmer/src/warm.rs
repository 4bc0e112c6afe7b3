//! One warmer pass over both caches

use crate::error::Result;
use crate::types::{WarmReport, WarmerConfig};
use asset_cache::{AssetCache, AssetConfig, AssetKind};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tiered_kv_cache::{CacheConfig, CacheManager, StorageTier};
use tracing::{info, warn};

/// KV key holding the previous run's report
pub const LAST_RUN_KEY: &str = "media-cache-warmer:last-run";

enum Warmed {
    Stored,
    Passthrough,
    Failed,
}

/// Initialize both caches, warm the configured URLs, sweep old assets and
/// dispose the caches again
pub async fn run(
    cache: &Arc<CacheManager>,
    assets: &Arc<AssetCache>,
    config: &WarmerConfig,
) -> Result<WarmReport> {
    let kv_capabilities = cache.init().await;
    let asset_capabilities = assets.init().await;
    info!(
        kv = ?kv_capabilities.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        assets = ?asset_capabilities.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        "Caches initialized"
    );

    let report_config = CacheConfig::default().with_storage(StorageTier::Local);
    if let Some(previous) = cache.get::<WarmReport>(LAST_RUN_KEY, &report_config).await {
        info!(
            started_at = ?previous.started_at,
            warmed = previous.warmed,
            failed = previous.failed,
            "Previous warmer run"
        );
    }

    let mut report = WarmReport {
        started_at: Some(Utc::now()),
        ..WarmReport::default()
    };

    let outcomes: Vec<Warmed> = stream::iter(config.warm_urls.iter())
        .map(|url| warm_one(assets, url))
        .buffer_unordered(config.concurrency.max(1))
        .collect()
        .await;

    for outcome in outcomes {
        match outcome {
            Warmed::Stored => report.warmed += 1,
            Warmed::Passthrough => report.passthrough += 1,
            Warmed::Failed => report.failed += 1,
        }
    }

    let max_age = chrono::Duration::from_std(config.cleanup_max_age)
        .unwrap_or_else(|_| chrono::Duration::days(7));
    report.removed = assets.cleanup_old_entries(Utc::now() - max_age).await?;

    let asset_stats = assets.stats().await?;
    report.total_assets = asset_stats.total_assets;
    report.total_bytes = asset_stats.total_size;

    let kv_stats = cache.get_stats().await;
    info!(
        assets = asset_stats.total_assets,
        bytes = asset_stats.total_size,
        videos = asset_stats.videos,
        images = asset_stats.images,
        kv_items = kv_stats.total_items(),
        kv_bytes = kv_stats.total_size,
        "Cache stats"
    );

    cache.set(LAST_RUN_KEY, &report, &report_config).await;

    cache.dispose().await;
    assets.dispose().await;

    Ok(report)
}

async fn warm_one(assets: &Arc<AssetCache>, url: &str) -> Warmed {
    let kind = AssetKind::sniff_url(url).unwrap_or(AssetKind::Image);
    match assets.cache_asset(url, kind, &AssetConfig::default(), None).await {
        Ok(source) if source.is_cached() => {
            info!(url = %url, kind = %kind, "Warmed asset");
            Warmed::Stored
        }
        Ok(_) => Warmed::Passthrough,
        Err(e) => {
            warn!(url = %url, error = %e, "Failed to warm asset");
            Warmed::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asset_cache::{AssetError, AssetFetcher, FetchedAsset, ProgressCallback};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{tempdir, TempDir};

    /// Serves every URL ending in `.mp4` or `.jpg`; anything else fails
    #[derive(Default)]
    struct StaticFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for StaticFetcher {
        async fn fetch(
            &self,
            url: &str,
            _on_progress: Option<ProgressCallback>,
        ) -> asset_cache::Result<FetchedAsset> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let content_type = if url.ends_with(".mp4") {
                "video/mp4"
            } else if url.ends_with(".jpg") {
                "image/jpeg"
            } else {
                return Err(AssetError::Http {
                    status: 404,
                    url: url.to_string(),
                });
            };
            Ok(FetchedAsset {
                data: Bytes::from(format!("bytes of {}", url)),
                content_type: content_type.to_string(),
            })
        }
    }

    struct Setup {
        config: WarmerConfig,
        fetcher: Arc<StaticFetcher>,
        _dir: TempDir,
    }

    fn setup(urls: &[&str]) -> Setup {
        let dir = tempdir().unwrap();
        Setup {
            config: WarmerConfig {
                asset_cache_dir: dir.path().join("assets"),
                kv_cache_dir: Some(dir.path().join("kv")),
                warm_urls: urls.iter().map(|u| u.to_string()).collect(),
                ..WarmerConfig::default()
            },
            fetcher: Arc::new(StaticFetcher::default()),
            _dir: dir,
        }
    }

    fn services(setup: &Setup) -> (Arc<CacheManager>, Arc<AssetCache>) {
        let cache = Arc::new(CacheManager::new(setup.config.kv_settings()));
        let assets = Arc::new(
            AssetCache::builder()
                .settings(setup.config.asset_settings())
                .fetcher(setup.fetcher.clone())
                .build()
                .unwrap(),
        );
        (cache, assets)
    }

    #[tokio::test]
    async fn test_run_warms_urls_and_counts_failures() {
        let setup = setup(&[
            "https://cdn.example.com/hero.mp4",
            "https://cdn.example.com/poster.jpg",
            "https://cdn.example.com/missing.png",
        ]);
        let (cache, assets) = services(&setup);

        let report = run(&cache, &assets, &setup.config).await.unwrap();
        assert_eq!(report.warmed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.passthrough, 0);
        assert_eq!(report.removed, 0);
        assert_eq!(report.total_assets, 2);
        assert!(report.total_bytes > 0);
        assert!(cache.is_disposed());
    }

    #[tokio::test]
    async fn test_second_run_served_from_store() {
        let setup = setup(&["https://cdn.example.com/hero.mp4"]);

        let (cache, assets) = services(&setup);
        run(&cache, &assets, &setup.config).await.unwrap();
        assert_eq!(setup.fetcher.calls.load(Ordering::SeqCst), 1);

        // Fresh services over the same directories
        let (cache, assets) = services(&setup);
        let report = run(&cache, &assets, &setup.config).await.unwrap();
        assert_eq!(report.warmed, 1);
        assert_eq!(setup.fetcher.calls.load(Ordering::SeqCst), 1);

        // The previous report survived in the local tier
        let reader = CacheManager::new(setup.config.kv_settings());
        reader.init().await;
        let last: Option<WarmReport> = reader
            .get(LAST_RUN_KEY, &CacheConfig::default().with_storage(StorageTier::Local))
            .await;
        assert_eq!(last, Some(report));
    }

    #[tokio::test]
    async fn test_zero_max_age_sweeps_everything() {
        let mut setup = setup(&["https://cdn.example.com/poster.jpg"]);
        let (cache, assets) = services(&setup);
        run(&cache, &assets, &setup.config).await.unwrap();

        setup.config.warm_urls.clear();
        setup.config.cleanup_max_age = std::time::Duration::ZERO;
        let (cache, assets) = services(&setup);
        let report = run(&cache, &assets, &setup.config).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.total_assets, 0);
    }
}
