//! Storage backends for the cache tiers
//!
//! Every tier is reached through the same string-valued
//! `get`/`set`/`remove`/`keys`/`clear` surface. Availability is probed once
//! by the manager at init.

mod local;
mod memory;
mod session;

pub use local::FileBackend;
pub use memory::MemoryBackend;
pub use session::SessionBackend;

use crate::error::{BackendError, Result};
use crate::types::StorageTier;
use async_trait::async_trait;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn tier(&self) -> StorageTier;

    /// Check whether the backend can be used at all
    async fn probe(&self) -> bool {
        true
    }

    /// Prepare the backend after a successful probe
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`; a quota failure leaves any old value in place
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;
}

/// Bytes a key/value pair occupies against a browser-style storage quota
///
/// Web storage counts UTF-16 code units, two bytes each.
pub fn quota_cost(key: &str, value: &str) -> u64 {
    ((key.encode_utf16().count() + value.encode_utf16().count()) * 2) as u64
}

/// Fail with `QuotaExceeded` if replacing `old_cost` with `new_cost` would overflow `quota`
pub(crate) fn ensure_fits(
    tier: StorageTier,
    quota: u64,
    used: u64,
    old_cost: u64,
    new_cost: u64,
) -> Result<()> {
    let available = quota.saturating_sub(used.saturating_sub(old_cost));
    if new_cost > available {
        return Err(BackendError::QuotaExceeded {
            tier,
            needed: new_cost,
            available,
        });
    }
    Ok(())
}
