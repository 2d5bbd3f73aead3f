use super::{Clock, MemoryStore, ProxyCacheEntry, ProxyStore, SystemClock, HANDLE_TTL_SECS};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BUCKET_SECS: i64 = 3600;

pub struct ProxyCache {
    shared: Option<Arc<dyn ProxyStore>>,
    fallback: MemoryStore,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl ProxyCache {
    /// `shared` is the cross-process store; `None` runs on the fallback alone.
    pub fn new(shared: Option<Arc<dyn ProxyStore>>, fallback: MemoryStore) -> Self {
        Self {
            shared,
            fallback,
            clock: Arc::new(SystemClock),
            ttl: Duration::seconds(HANDLE_TTL_SECS),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn has_shared_store(&self) -> bool {
        self.shared.is_some()
    }

    // sha256(origin_url:owner_key:hour_bucket), stable within a clock hour
    pub fn derive_handle(origin_url: &str, owner_key: &str, now: DateTime<Utc>) -> String {
        let bucket = now.timestamp().div_euclid(BUCKET_SECS);
        let mut hasher = Sha256::new();
        hasher.update(format!("{origin_url}:{owner_key}:{bucket}").as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn proxy_url(base: &str, handle: &str) -> String {
        format!("{}/proxy/stream/{}", base.trim_end_matches('/'), handle)
    }

    /// Registers `origin_url` for `owner_key` and returns its handle.
    /// Re-registration inside the same hour overwrites the entry and
    /// refreshes its expiry.
    pub async fn register(&self, origin_url: &str, owner_key: &str) -> String {
        let now = self.clock.now();
        let handle = Self::derive_handle(origin_url, owner_key, now);
        let entry = ProxyCacheEntry {
            handle: handle.clone(),
            origin_url: origin_url.to_string(),
            owner_key: owner_key.to_string(),
            created_at: now,
            expires_at: now + self.ttl,
        };

        if let Some(shared) = &self.shared {
            match shared.upsert(&entry).await {
                Ok(()) => {
                    info!(handle = %handle, "registered proxy handle");
                    return handle;
                }
                Err(e) => warn!(error = %e, "shared proxy store unreachable, using local fallback"),
            }
        }

        if let Err(e) = self.fallback.upsert(&entry).await {
            warn!(handle = %handle, error = %e, "local fallback rejected proxy handle");
        }
        info!(handle = %handle, store = "memory", "registered proxy handle");
        handle
    }

    /// Looks a handle up. `None` is the normal miss/expired outcome.
    pub async fn resolve(&self, handle: &str) -> Option<String> {
        let now = self.clock.now();

        if let Some(shared) = &self.shared {
            match shared.get(handle).await {
                Ok(Some(entry)) => return Self::live_url(shared.as_ref(), entry, now).await,
                // entries written during an outage only exist locally
                Ok(None) => {}
                Err(e) => warn!(error = %e, "shared proxy store unreachable, reading local fallback"),
            }
        }

        match self.fallback.get(handle).await {
            Ok(Some(entry)) => Self::live_url(&self.fallback, entry, now).await,
            _ => {
                debug!(handle = %handle, "proxy handle not found");
                None
            }
        }
    }

    async fn live_url(
        store: &dyn ProxyStore,
        entry: ProxyCacheEntry,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if entry.is_live(now) {
            return Some(entry.origin_url);
        }
        debug!(handle = %entry.handle, "proxy handle expired");
        if let Err(e) = store.delete(&entry.handle).await {
            debug!(error = %e, "failed to delete expired proxy handle");
        }
        None
    }

    /// Sweeps expired entries out of the process-local store. The shared
    /// store expires entries on its own.
    pub async fn purge_fallback(&self) -> usize {
        let purged = self.fallback.purge_expired(self.clock.now()).await;
        if purged > 0 {
            info!(purged, "cleaned up expired fallback proxy entries");
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::error::StoreError;
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    fn memory_cache(clock: Arc<ManualClock>) -> ProxyCache {
        ProxyCache::new(None, MemoryStore::default()).with_clock(clock)
    }

    struct DownStore;

    #[async_trait]
    impl ProxyStore for DownStore {
        async fn upsert(&self, _: &ProxyCacheEntry) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _: &str) -> Result<Option<ProxyCacheEntry>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn handle_is_stable_within_the_hour_and_changes_across_it() {
        let url = "https://cdn.example/a.mp3";
        let a = ProxyCache::derive_handle(url, "apikeyA", at(14, 10));
        let b = ProxyCache::derive_handle(url, "apikeyA", at(14, 55));
        let c = ProxyCache::derive_handle(url, "apikeyA", at(15, 0));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn handle_depends_on_owner_and_url() {
        let t = at(14, 10);
        let base = ProxyCache::derive_handle("https://cdn.example/a.mp3", "k1", t);
        assert_ne!(base, ProxyCache::derive_handle("https://cdn.example/a.mp3", "k2", t));
        assert_ne!(base, ProxyCache::derive_handle("https://cdn.example/b.mp3", "k1", t));
    }

    #[test]
    fn proxy_url_joins_without_double_slash() {
        assert_eq!(
            ProxyCache::proxy_url("http://relay.local/", "abc"),
            "http://relay.local/proxy/stream/abc"
        );
    }

    #[tokio::test]
    async fn hour_bucket_scenario() {
        let clock = Arc::new(ManualClock::new(at(14, 10)));
        let cache = memory_cache(clock.clone());
        let url = "https://cdn.example/a.mp3";

        let first = cache.register(url, "apikeyA").await;
        clock.set(at(14, 55));
        let second = cache.register(url, "apikeyA").await;
        assert_eq!(first, second);

        clock.set(at(14, 56));
        assert_eq!(cache.resolve(&first).await.as_deref(), Some(url));

        clock.set(at(16, 0));
        assert_eq!(cache.resolve(&first).await, None);
    }

    #[tokio::test]
    async fn expired_handle_is_deleted_and_can_be_registered_again() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let cache = memory_cache(clock.clone());
        let url = "https://cdn.example/b.mp3";

        let handle = cache.register(url, "owner").await;
        clock.set(at(10, 30));
        assert_eq!(cache.resolve(&handle).await, None);
        assert!(cache.fallback.is_empty().await);

        let fresh = cache.register(url, "owner").await;
        assert_eq!(cache.resolve(&fresh).await.as_deref(), Some(url));
    }

    #[tokio::test]
    async fn unknown_handle_is_a_plain_miss() {
        let cache = memory_cache(Arc::new(ManualClock::new(at(9, 0))));
        assert_eq!(cache.resolve("nope").await, None);
    }

    #[tokio::test]
    async fn falls_back_to_memory_when_shared_store_is_down() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let cache = ProxyCache::new(Some(Arc::new(DownStore)), MemoryStore::default())
            .with_clock(clock);
        let url = "https://cdn.example/c.mp3";

        let handle = cache.register(url, "owner").await;
        assert_eq!(cache.resolve(&handle).await.as_deref(), Some(url));
    }

    #[tokio::test]
    async fn shared_store_is_preferred_when_reachable() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let shared = Arc::new(MemoryStore::default());
        let cache = ProxyCache::new(Some(shared.clone()), MemoryStore::default())
            .with_clock(clock);

        let handle = cache.register("https://cdn.example/d.mp3", "owner").await;

        assert!(shared.get(&handle).await.unwrap().is_some());
        assert!(cache.fallback.is_empty().await);
    }

    #[tokio::test]
    async fn fallback_entries_survive_shared_store_recovery() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let down = ProxyCache::new(Some(Arc::new(DownStore)), MemoryStore::default())
            .with_clock(clock.clone());
        let handle = down.register("https://cdn.example/e.mp3", "owner").await;

        // same fallback map, shared store now healthy but empty
        let recovered = ProxyCache {
            shared: Some(Arc::new(MemoryStore::default())),
            fallback: down.fallback,
            clock,
            ttl: down.ttl,
        };
        assert!(recovered.resolve(&handle).await.is_some());
    }

    #[tokio::test]
    async fn purge_fallback_drops_expired_entries() {
        let clock = Arc::new(ManualClock::new(at(9, 0)));
        let cache = memory_cache(clock.clone());
        cache.register("https://cdn.example/f.mp3", "owner").await;
        cache.register("https://cdn.example/g.mp3", "owner").await;

        clock.set(at(9, 30));
        assert_eq!(cache.purge_fallback().await, 0);
        clock.set(at(10, 1));
        assert_eq!(cache.purge_fallback().await, 2);
    }
}
