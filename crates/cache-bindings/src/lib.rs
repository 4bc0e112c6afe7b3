//! Component bindings for the tiered and asset caches
//!
//! A binding follows one consumer from mount to unmount. It performs the
//! cache read on mount, publishes state changes on a watch channel and
//! ignores every completion that arrives after unmount. The underlying
//! requests are never aborted; per-key de-duplication lives in the cache
//! services themselves.

pub mod content;
pub mod context;
pub mod media;

#[cfg(test)]
mod testing;

pub use content::{
    CachedContent, ContentFetcher, ContentOptions, ContentPhase, ContentState, ErrorCallback,
    SuccessCallback,
};
pub use context::CacheContext;
pub use media::{CachedMedia, MediaOptions, MediaState, DEFAULT_MEDIA_TIMEOUT};
