//! Media cache warmer
//!
//! Initializes the tiered KV cache and the asset cache, downloads the
//! configured media into the asset store, sweeps entries past their maximum
//! age and logs cache statistics.

mod error;
mod types;
mod warm;

use crate::error::Result;
use crate::types::{parse_warm_urls, WarmerConfig};
use asset_cache::AssetCache;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tiered_kv_cache::CacheManager;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let env_filter =
        EnvFilter::from_default_env().add_directive("media_cache_warmer=info".parse()?);

    // Use JSON format for GCP Cloud Logging when LOG_FORMAT=json
    if std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false)
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    };

    info!("Starting media cache warmer...");

    let config = load_config()?;
    info!("Asset cache dir: {:?}", config.asset_cache_dir);
    info!("KV cache dir: {:?}", config.kv_cache_dir);
    info!("URLs to warm: {}", config.warm_urls.len());
    info!("Cleanup max age: {} seconds", config.cleanup_max_age.as_secs());

    let cache = Arc::new(CacheManager::new(config.kv_settings()));
    let assets = Arc::new(AssetCache::new(config.asset_settings())?);

    let report = warm::run(&cache, &assets, &config).await?;
    info!(
        warmed = report.warmed,
        passthrough = report.passthrough,
        failed = report.failed,
        removed = report.removed,
        "Warmer run complete"
    );

    report.check()
}

fn load_config() -> Result<WarmerConfig> {
    let defaults = WarmerConfig::default();

    let asset_cache_dir = std::env::var("ASSET_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or(defaults.asset_cache_dir);

    let max_asset_cache_size = std::env::var("MAX_ASSET_CACHE_SIZE")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.max_asset_cache_size);

    // An empty KV_CACHE_DIR disables the local tier
    let kv_cache_dir = match std::env::var("KV_CACHE_DIR") {
        Ok(dir) if dir.is_empty() => None,
        Ok(dir) => Some(PathBuf::from(dir)),
        Err(_) => defaults.kv_cache_dir,
    };

    let warm_urls = match std::env::var("WARM_URLS") {
        Ok(raw) => parse_warm_urls(&raw)?,
        Err(_) => Vec::new(),
    };

    let cleanup_max_age = std::env::var("CLEANUP_MAX_AGE_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.cleanup_max_age);

    let local_quota_bytes = std::env::var("LOCAL_QUOTA_BYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.local_quota_bytes);

    let session_quota_bytes = std::env::var("SESSION_QUOTA_BYTES")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(defaults.session_quota_bytes);

    let fetch_timeout = std::env::var("FETCH_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(defaults.fetch_timeout);

    let concurrency = std::env::var("WARM_CONCURRENCY")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(defaults.concurrency);

    Ok(WarmerConfig {
        asset_cache_dir,
        max_asset_cache_size,
        kv_cache_dir,
        warm_urls,
        cleanup_max_age,
        local_quota_bytes,
        session_quota_bytes,
        fetch_timeout,
        concurrency,
    })
}
