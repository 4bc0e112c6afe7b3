//! Asset cache types

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".webm", ".mov", ".m4v", ".ogv"];
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".svg"];

/// Media classification used for statistics and UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Image,
    Video,
}

impl AssetKind {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type.trim().to_ascii_lowercase();
        if mime.starts_with("video/") {
            Some(AssetKind::Video)
        } else if mime.starts_with("image/") {
            Some(AssetKind::Image)
        } else {
            None
        }
    }

    /// Guess from the URL alone
    pub fn sniff_url(url: &str) -> Option<Self> {
        let lower = url.to_ascii_lowercase();
        let path = lower.split(['?', '#']).next().unwrap_or("");

        if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) || path.contains("video") {
            Some(AssetKind::Video)
        } else if IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            Some(AssetKind::Image)
        } else {
            None
        }
    }

    /// Stored MIME type first, URL sniffing second, the caller's hint last
    pub fn classify(content_type: &str, url: &str, hint: AssetKind) -> Self {
        Self::from_content_type(content_type)
            .or_else(|| Self::sniff_url(url))
            .unwrap_or(hint)
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetKind::Image => f.write_str("image"),
            AssetKind::Video => f.write_str("video"),
        }
    }
}

/// Metadata for a cached asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetEntry {
    pub key: String,
    pub url: String,
    pub content_type: String,
    pub kind: AssetKind,
    pub size: u64,
    pub timestamp: DateTime<Utc>,
    pub version: Option<String>,
}

/// An asset's metadata together with its bytes
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub entry: AssetEntry,
    pub data: Bytes,
}

impl StoredAsset {
    /// Size matches the payload and the payload is non-empty
    pub fn is_valid(&self) -> bool {
        !self.data.is_empty() && self.entry.size == self.data.len() as u64
    }
}

/// A snapshot of download progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadProgress {
    pub loaded: u64,
    /// Expected size, when the server announced one
    pub total: Option<u64>,
    /// `loaded / total * 100` clamped to [0, 100]; absent when the total is unknown
    pub percentage: Option<f64>,
}

impl LoadProgress {
    pub fn new(loaded: u64, total: Option<u64>) -> Self {
        let total = total.filter(|t| *t > 0);
        let percentage = total.map(|t| (loaded as f64 / t as f64 * 100.0).clamp(0.0, 100.0));
        Self {
            loaded,
            total,
            percentage,
        }
    }
}

pub type ProgressCallback = Arc<dyn Fn(LoadProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Webp,
    Jpg,
    Png,
    #[default]
    Auto,
}

impl ImageFormat {
    /// Query value for the format, `None` when the server should choose
    pub fn as_param(&self) -> Option<&'static str> {
        match self {
            ImageFormat::Webp => Some("webp"),
            ImageFormat::Jpg => Some("jpg"),
            ImageFormat::Png => Some("png"),
            ImageFormat::Auto => None,
        }
    }
}

/// Per-call options for caching an asset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetConfig {
    /// Serve a cached copy immediately and refresh it in the background
    pub stale_while_revalidate: bool,
    pub quality: Option<u8>,
    pub format: ImageFormat,
    pub width: Option<u32>,
    /// Cached copies with a different version are stale
    pub version: Option<String>,
    /// Cached copies older than this are stale
    pub max_age: Option<Duration>,
    /// Tried only when the primary URL and any cached copy are both unavailable
    pub fallback_url: Option<String>,
}

/// Where the DOM should load an asset from
#[derive(Debug, Clone, PartialEq)]
pub enum AssetSource {
    /// Not cached; load from the network
    Network { url: String },
    /// Cached bytes, available without further network activity
    Cached {
        key: String,
        content_type: String,
        kind: AssetKind,
        data: Bytes,
    },
}

impl AssetSource {
    pub fn from_stored(asset: &StoredAsset) -> Self {
        AssetSource::Cached {
            key: asset.entry.key.clone(),
            content_type: asset.entry.content_type.clone(),
            kind: asset.entry.kind,
            data: asset.data.clone(),
        }
    }

    /// A value usable as an `src` attribute: the network URL or a data URL
    pub fn src(&self) -> String {
        match self {
            AssetSource::Network { url } => url.clone(),
            AssetSource::Cached {
                content_type, data, ..
            } => format!("data:{};base64,{}", content_type, STANDARD.encode(data)),
        }
    }

    pub fn is_cached(&self) -> bool {
        matches!(self, AssetSource::Cached { .. })
    }
}

/// Statistics computed by scanning the binary store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetStats {
    pub total_assets: usize,
    pub total_size: u64,
    pub videos: usize,
    pub images: usize,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

impl AssetStats {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a AssetEntry>) -> Self {
        let mut stats = AssetStats::default();
        for entry in entries {
            stats.total_assets += 1;
            stats.total_size += entry.size;
            match entry.kind {
                AssetKind::Video => stats.videos += 1,
                AssetKind::Image => stats.images += 1,
            }
            stats.oldest_entry = Some(stats.oldest_entry.map_or(entry.timestamp, |o| o.min(entry.timestamp)));
            stats.newest_entry = Some(stats.newest_entry.map_or(entry.timestamp, |n| n.max(entry.timestamp)));
        }
        stats
    }
}

/// Construction-time settings for [`crate::AssetCache`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetCacheSettings {
    pub cache_dir: PathBuf,
    pub max_cache_size: u64,
    pub fetch_timeout: Duration,
    /// Name of the service worker cache mirrored by this store
    pub cache_name: String,
}

impl Default for AssetCacheSettings {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("./cache/assets"),
            max_cache_size: 1024 * 1024 * 1024, // 1GB
            fetch_timeout: Duration::from_secs(30),
            cache_name: "media-assets".to_string(),
        }
    }
}

impl AssetCacheSettings {
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Ok(dir) = std::env::var("ASSET_CACHE_DIR") {
            settings.cache_dir = PathBuf::from(dir);
        }

        if let Some(size) = std::env::var("MAX_ASSET_CACHE_SIZE")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            settings.max_cache_size = size;
        }

        if let Some(secs) = std::env::var("FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            settings.fetch_timeout = Duration::from_secs(secs);
        }

        if let Ok(name) = std::env::var("ASSET_CACHE_NAME") {
            settings.cache_name = name;
        }

        settings
    }
}
