mod disk_cache;
mod memory_cache;
mod proxy_cache;
mod redis_cache;

pub use disk_cache::*;
pub use memory_cache::*;
pub use proxy_cache::*;
pub use redis_cache::*;

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub const HANDLE_TTL_SECS: i64 = 3600;
pub const DEFAULT_FALLBACK_CAPACITY: usize = 10_000;
pub const DOWNLOAD_DIR: &str = "downloads";

/// One registered handle. Replaced wholesale on re-registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCacheEntry {
    pub handle: String,
    pub origin_url: String,
    pub owner_key: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ProxyCacheEntry {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Keyed store behind the proxy cache. Implementations must provide atomic
/// upsert/read/delete; expiry checks are done by the caller.
#[async_trait]
pub trait ProxyStore: Send + Sync {
    async fn upsert(&self, entry: &ProxyCacheEntry) -> Result<(), StoreError>;

    async fn get(&self, handle: &str) -> Result<Option<ProxyCacheEntry>, StoreError>;

    async fn delete(&self, handle: &str) -> Result<(), StoreError>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used to exercise hour buckets and
/// expiry deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
