//! Core types for the media cache warmer

use crate::error::{Result, WarmerError};
use asset_cache::AssetCacheSettings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tiered_kv_cache::TieredCacheSettings;

/// Configuration for one warmer run
#[derive(Debug, Clone, PartialEq)]
pub struct WarmerConfig {
    pub asset_cache_dir: PathBuf,
    pub max_asset_cache_size: u64,
    /// `None` runs without the local KV tier
    pub kv_cache_dir: Option<PathBuf>,
    pub warm_urls: Vec<String>,
    pub cleanup_max_age: Duration,
    pub local_quota_bytes: u64,
    pub session_quota_bytes: u64,
    pub fetch_timeout: Duration,
    /// Downloads in flight at once
    pub concurrency: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            asset_cache_dir: PathBuf::from("./cache/assets"),
            max_asset_cache_size: 1024 * 1024 * 1024, // 1GB
            kv_cache_dir: Some(PathBuf::from("./cache/kv")),
            warm_urls: Vec::new(),
            cleanup_max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            local_quota_bytes: 5 * 1024 * 1024,
            session_quota_bytes: 5 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}

impl WarmerConfig {
    pub fn kv_settings(&self) -> TieredCacheSettings {
        TieredCacheSettings {
            session_quota_bytes: self.session_quota_bytes,
            local_quota_bytes: self.local_quota_bytes,
            local_dir: self.kv_cache_dir.clone(),
            ..TieredCacheSettings::default()
        }
    }

    pub fn asset_settings(&self) -> AssetCacheSettings {
        AssetCacheSettings {
            cache_dir: self.asset_cache_dir.clone(),
            max_cache_size: self.max_asset_cache_size,
            fetch_timeout: self.fetch_timeout,
            ..AssetCacheSettings::default()
        }
    }
}

/// Split a comma or whitespace separated URL list, rejecting anything that
/// is not an absolute http(s) URL
pub fn parse_warm_urls(raw: &str) -> Result<Vec<String>> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| match url::Url::parse(s) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(s.to_string()),
            _ => Err(WarmerError::Config(format!("invalid WARM_URLS entry: {}", s))),
        })
        .collect()
}

/// Outcome of a warmer run, also kept in the KV cache for the next run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Stored in (or already present in) the asset store
    pub warmed: usize,
    /// Resolved to a network URL because no store was available
    pub passthrough: usize,
    pub failed: usize,
    /// Entries removed by the age sweep
    pub removed: usize,
    pub total_assets: usize,
    pub total_bytes: u64,
}

impl WarmReport {
    /// Fail the run when URLs were configured but none could be fetched
    pub fn check(&self) -> Result<()> {
        if self.failed > 0 && self.warmed == 0 && self.passthrough == 0 {
            return Err(WarmerError::NothingWarmed {
                failed: self.failed,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WarmerConfig::default();
        assert_eq!(config.asset_cache_dir, PathBuf::from("./cache/assets"));
        assert_eq!(config.kv_cache_dir, Some(PathBuf::from("./cache/kv")));
        assert!(config.warm_urls.is_empty());
        assert_eq!(config.cleanup_max_age, Duration::from_secs(604_800));
        assert_eq!(config.local_quota_bytes, 5 * 1024 * 1024);
    }

    #[test]
    fn test_settings_derived_from_config() {
        let config = WarmerConfig {
            kv_cache_dir: None,
            fetch_timeout: Duration::from_secs(5),
            ..WarmerConfig::default()
        };
        assert_eq!(config.kv_settings().local_dir, None);
        assert_eq!(config.asset_settings().fetch_timeout, Duration::from_secs(5));
        assert_eq!(config.asset_settings().cache_name, "media-assets");
    }

    #[test]
    fn test_parse_warm_urls() {
        let urls = parse_warm_urls(
            "https://cdn.example.com/hero.mp4, https://cdn.example.com/poster.jpg\nhttp://cdn.example.com/a.png",
        )
        .unwrap();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/hero.mp4",
                "https://cdn.example.com/poster.jpg",
                "http://cdn.example.com/a.png",
            ]
        );

        assert!(parse_warm_urls("").unwrap().is_empty());
        assert!(matches!(
            parse_warm_urls("https://cdn.example.com/a.jpg,/relative.jpg"),
            Err(WarmerError::Config(_))
        ));
        assert!(parse_warm_urls("ftp://cdn.example.com/a.jpg").is_err());
    }

    #[test]
    fn test_report_serialization() {
        let report = WarmReport {
            started_at: Some(Utc::now()),
            warmed: 3,
            failed: 1,
            total_bytes: 12345,
            ..WarmReport::default()
        };

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("12345"));

        let parsed: WarmReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_report_check() {
        let all_failed = WarmReport {
            failed: 2,
            ..WarmReport::default()
        };
        assert!(matches!(
            all_failed.check(),
            Err(WarmerError::NothingWarmed { failed: 2 })
        ));

        let partial = WarmReport {
            warmed: 1,
            failed: 2,
            ..WarmReport::default()
        };
        assert!(partial.check().is_ok());
        assert!(WarmReport::default().check().is_ok());
    }
}
