//! Cache types

use cache_primitives::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Version tag written when the caller does not pin one
pub const DEFAULT_VERSION: &str = "1.0";

/// The tiers a value can be stored in, fastest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Memory,
    Session,
    Local,
}

impl StorageTier {
    pub const ALL: [StorageTier; 3] = [StorageTier::Memory, StorageTier::Session, StorageTier::Local];

    pub fn backend_kind(&self) -> BackendKind {
        match self {
            StorageTier::Memory => BackendKind::Memory,
            StorageTier::Session => BackendKind::SessionDurable,
            StorageTier::Local => BackendKind::LocalDurable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Memory => "memory",
            StorageTier::Session => "session",
            StorageTier::Local => "local",
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which stored versions a read accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionReq {
    /// Only entries written with exactly this tag
    Exact(String),
    /// Any tag; used for stale fallback after a failed fetch
    Any,
}

impl VersionReq {
    pub fn matches(&self, stored: &str) -> bool {
        match self {
            VersionReq::Exact(expected) => expected == stored,
            VersionReq::Any => true,
        }
    }

    /// The tag recorded on write
    pub fn write_tag(&self) -> &str {
        match self {
            VersionReq::Exact(tag) => tag,
            VersionReq::Any => DEFAULT_VERSION,
        }
    }
}

impl Default for VersionReq {
    fn default() -> Self {
        VersionReq::Exact(DEFAULT_VERSION.to_string())
    }
}

/// Per-call cache options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Pin the write to a tier; `None` applies the size policy
    pub storage: Option<StorageTier>,
    /// Maximum age; on reads this overrides the ttl stored with the entry
    pub ttl: Option<Duration>,
    pub version: VersionReq,
    /// Serve expired entries too
    pub ignore_ttl: bool,
}

impl CacheConfig {
    pub fn with_storage(mut self, tier: StorageTier) -> Self {
        self.storage = Some(tier);
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = VersionReq::Exact(version.into());
        self
    }

    /// The same options, relaxed to accept any version and any age
    pub fn stale_fallback(&self) -> Self {
        Self {
            version: VersionReq::Any,
            ignore_ttl: true,
            ..self.clone()
        }
    }
}

/// A stored value with its freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    /// Write time, epoch milliseconds
    pub timestamp: i64,
    pub version: String,
    /// Maximum age in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,
}

impl<T> CacheEntry<T> {
    /// Whether the entry is older than `ttl_override`, or its own ttl
    pub fn is_expired(&self, now_ms: i64, ttl_override: Option<Duration>) -> bool {
        let ttl_ms = ttl_override
            .map(|ttl| ttl.as_millis() as u64)
            .or(self.ttl);
        match ttl_ms {
            Some(ttl_ms) => now_ms.saturating_sub(self.timestamp) > ttl_ms as i64,
            None => false,
        }
    }

    pub fn written_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp)
    }
}

/// Item count and approximate byte size of one tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: StorageTier,
    pub items: usize,
    /// Sum of serialized entry lengths
    pub size: u64,
}

/// Statistics about the tiered cache, computed by scanning live entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory_items: usize,
    pub session_items: usize,
    pub local_items: usize,
    pub total_size: u64,
    pub tiers: Vec<TierStats>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub newest_entry: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn total_items(&self) -> usize {
        self.memory_items + self.session_items + self.local_items
    }
}

/// Construction-time settings for [`crate::CacheManager`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieredCacheSettings {
    pub session_quota_bytes: u64,
    pub local_quota_bytes: u64,
    /// Directory of the local tier; `None` disables it
    pub local_dir: Option<PathBuf>,
    /// Serialized entries up to this size get a durable copy by default
    pub small_value_limit: usize,
    /// Durable tier used when the caller does not pin one
    pub default_durable_tier: StorageTier,
}

impl Default for TieredCacheSettings {
    fn default() -> Self {
        Self {
            session_quota_bytes: 5 * 1024 * 1024, // 5 MiB
            local_quota_bytes: 5 * 1024 * 1024,   // 5 MiB
            local_dir: Some(PathBuf::from("./cache/kv")),
            small_value_limit: 64 * 1024, // 64 KiB
            default_durable_tier: StorageTier::Session,
        }
    }
}

impl TieredCacheSettings {
    /// Read settings from environment variables, keeping defaults for unset ones
    pub fn from_env() -> Self {
        let mut settings = Self::default();

        if let Some(bytes) = std::env::var("SESSION_QUOTA_BYTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            settings.session_quota_bytes = bytes;
        }

        if let Some(bytes) = std::env::var("LOCAL_QUOTA_BYTES")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            settings.local_quota_bytes = bytes;
        }

        match std::env::var("KV_CACHE_DIR") {
            Ok(dir) if dir.is_empty() => settings.local_dir = None,
            Ok(dir) => settings.local_dir = Some(PathBuf::from(dir)),
            Err(_) => {}
        }

        if let Some(limit) = std::env::var("KV_SMALL_VALUE_LIMIT")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            settings.small_value_limit = limit;
        }

        settings
    }
}
