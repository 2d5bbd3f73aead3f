use super::{ProxyCacheEntry, ProxyStore, DEFAULT_FALLBACK_CAPACITY};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use tokio::sync::Mutex;

/// Process-local proxy store, used when the shared store is absent or
/// unreachable. Entries are lost on restart. Bounded by LRU eviction.
pub struct MemoryStore {
    store: Mutex<LruCache<String, ProxyCacheEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            store: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut store = self.store.lock().await;
        let expired: Vec<String> = store
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.pop(key);
        }
        expired.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_CAPACITY)
    }
}

#[async_trait]
impl ProxyStore for MemoryStore {
    async fn upsert(&self, entry: &ProxyCacheEntry) -> Result<(), StoreError> {
        self.store
            .lock()
            .await
            .put(entry.handle.clone(), entry.clone());
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Option<ProxyCacheEntry>, StoreError> {
        Ok(self.store.lock().await.get(handle).cloned())
    }

    async fn delete(&self, handle: &str) -> Result<(), StoreError> {
        self.store.lock().await.pop(handle);
        Ok(())
    }
}
