//! Tiered key-value cache
//!
//! Stores small-to-medium JSON values across three tiers, fastest first:
//! process memory, a session-scoped quota store and a file-backed local store
//! that survives restarts. Reads check tiers in that order and promote hits
//! into memory. Writes go to one durable tier (explicit or by size policy)
//! plus memory, and fall back to memory alone when the durable tier is over
//! quota.
//!
//! Misses are `None`, never errors, and writes never fail from the caller's
//! point of view.

pub mod backend;
pub mod error;
pub mod manager;
pub mod types;

pub use backend::{FileBackend, MemoryBackend, SessionBackend, StorageBackend};
pub use error::{BackendError, FetchError, Result};
pub use manager::{CacheManager, CacheManagerBuilder, FetchOutcome};
pub use types::{
    CacheConfig, CacheEntry, CacheStats, StorageTier, TierStats, TieredCacheSettings, VersionReq,
    DEFAULT_VERSION,
};
