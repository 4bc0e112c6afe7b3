//! Session-scoped quota store

use super::{ensure_fits, quota_cost, StorageBackend};
use crate::error::Result;
use crate::types::StorageTier;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct SessionState {
    entries: HashMap<String, String>,
    used: u64,
}

/// Byte-quota store that lives as long as the session (the process)
pub struct SessionBackend {
    state: RwLock<SessionState>,
    quota_bytes: u64,
}

impl SessionBackend {
    pub fn new(quota_bytes: u64) -> Self {
        Self {
            state: RwLock::new(SessionState::default()),
            quota_bytes,
        }
    }

    /// Bytes currently counted against the quota
    pub async fn used_bytes(&self) -> u64 {
        self.state.read().await.used
    }
}

#[async_trait]
impl StorageBackend for SessionBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::Session
    }

    async fn probe(&self) -> bool {
        self.quota_bytes > 0
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let old_cost = state
            .entries
            .get(key)
            .map(|old| quota_cost(key, old))
            .unwrap_or(0);
        let new_cost = quota_cost(key, value);

        ensure_fits(StorageTier::Session, self.quota_bytes, state.used, old_cost, new_cost)?;

        state.entries.insert(key.to_string(), value.to_string());
        state.used = state.used - old_cost + new_cost;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(old) = state.entries.remove(key) {
            state.used -= quota_cost(key, &old);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.state.read().await.entries.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.entries.clear();
        state.used = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_quota_is_enforced() {
        let backend = SessionBackend::new(20);

        // "k" + "abcd" = 5 units = 10 bytes
        backend.set("k", "abcd").await.unwrap();
        assert_eq!(backend.used_bytes().await, 10);

        let err = backend.set("j", "abcdefgh").await.unwrap_err();
        assert!(err.is_quota_exceeded());

        // Failed write leaves previous state intact
        assert_eq!(backend.get("j").await.unwrap(), None);
        assert_eq!(backend.used_bytes().await, 10);
    }

    #[tokio::test]
    async fn test_overwrite_reuses_budget() {
        let backend = SessionBackend::new(20);
        backend.set("k", "abcdefgh").await.unwrap(); // 18 bytes
        backend.set("k", "abcdefghi").await.unwrap(); // 20 bytes, replaces the old one
        assert_eq!(backend.used_bytes().await, 20);

        backend.remove("k").await.unwrap();
        assert_eq!(backend.used_bytes().await, 0);
    }

    #[tokio::test]
    async fn test_zero_quota_fails_probe() {
        assert!(!SessionBackend::new(0).probe().await);
        assert!(SessionBackend::new(1).probe().await);
    }
}
