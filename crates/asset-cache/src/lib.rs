//! Binary asset cache
//!
//! Keeps large media (images, videos) in a file-backed binary store keyed by
//! normalized URL plus transform parameters, reports download progress, and
//! hands back a source that is either the original network URL or the cached
//! bytes. Cached copies are preferred over surfacing fetch errors; a caller
//! fallback URL is tried last.
//!
//! A service worker, when present, is told about evictions with
//! fire-and-forget messages.

pub mod cache;
pub mod error;
pub mod fetcher;
pub mod key;
pub mod service_worker;
pub mod store;
pub mod types;

pub use cache::{AssetCache, AssetCacheBuilder};
pub use error::{AssetError, Result};
pub use fetcher::{AssetFetcher, FetchedAsset, HttpAssetFetcher};
pub use key::{asset_key, normalize_url, request_url};
pub use service_worker::{
    CacheTarget, ChannelPort, ServiceWorkerBridge, ServiceWorkerMessage, ServiceWorkerPort,
};
pub use store::{BinaryStore, FileBinaryStore};
pub use types::{
    AssetCacheSettings, AssetConfig, AssetEntry, AssetKind, AssetSource, AssetStats, ImageFormat,
    LoadProgress, ProgressCallback, StoredAsset,
};
