//! In-process memory tier

use super::StorageBackend;
use crate::error::Result;
use crate::types::StorageTier;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;

/// Unbounded in-memory tier, lost when the process exits
pub struct MemoryBackend {
    entries: Cache<String, Arc<str>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder().build(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn tier(&self) -> StorageTier {
        StorageTier::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).await.map(|v| v.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), Arc::from(value)).await;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.entries.run_pending_tasks().await;
        Ok(self.entries.iter().map(|(k, _)| k.as_ref().clone()).collect())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("a").await.unwrap(), None);

        backend.set("a", "1").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap().as_deref(), Some("1"));

        backend.remove("a").await.unwrap();
        assert_eq!(backend.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_keys_and_clear() {
        let backend = MemoryBackend::new();
        backend.set("products_1", "x").await.unwrap();
        backend.set("products_2", "y").await.unwrap();

        let mut keys = backend.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["products_1", "products_2"]);

        backend.clear().await.unwrap();
        assert!(backend.keys().await.unwrap().is_empty());
    }
}
