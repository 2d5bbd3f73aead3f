use super::{ProxyCacheEntry, ProxyStore};
use crate::error::StoreError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::info;

const KEY_PREFIX: &str = "audio_relay:proxy:";
/// Upper bound for any single store round trip. Past this the store counts
/// as unreachable and the caller falls back.
const STORE_TIMEOUT: Duration = Duration::from_secs(2);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Connects on first use. Until a connection is up, every call fails with
/// `Unavailable` and a new attempt is made at most once per backoff period.
/// Once connected, `ConnectionManager` handles reconnects itself.
pub struct RedisStore {
    client: redis::Client,
    conn: RwLock<Option<ConnectionManager>>,
    last_failure: Mutex<Option<Instant>>,
    reconnect_backoff: Duration,
}

impl RedisStore {
    /// Validates `url` without touching the network.
    pub fn new(url: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: redis::Client::open(url)?,
            conn: RwLock::new(None),
            last_failure: Mutex::new(None),
            reconnect_backoff: RECONNECT_BACKOFF,
        })
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::new(url)?;
        store.ensure_connected().await?;
        Ok(store)
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    pub async fn ensure_connected(&self) -> Result<(), StoreError> {
        self.connection().await.map(drop)
    }

    async fn connection(&self) -> Result<ConnectionManager, StoreError> {
        if let Some(conn) = self.conn.read().await.as_ref() {
            return Ok(conn.clone());
        }

        {
            let last = self.last_failure.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| at.elapsed() < self.reconnect_backoff) {
                return Err(StoreError::Unavailable("redis unreachable, waiting to reconnect".into()));
            }
        }

        match with_timeout(ConnectionManager::new(self.client.clone())).await {
            Ok(conn) => {
                *self.conn.write().await = Some(conn.clone());
                *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = None;
                info!("connected to shared proxy store");
                Ok(conn)
            }
            Err(e) => {
                *self.last_failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
                Err(e)
            }
        }
    }

    fn key(handle: &str) -> String {
        format!("{KEY_PREFIX}{handle}")
    }
}

async fn with_timeout<T, F>(fut: F) -> Result<T, StoreError>
where
    F: Future<Output = redis::RedisResult<T>>,
{
    match timeout(STORE_TIMEOUT, fut).await {
        Ok(result) => result.map_err(StoreError::from),
        Err(_) => Err(StoreError::Unavailable("redis timed out".into())),
    }
}

#[async_trait]
impl ProxyStore for RedisStore {
    // SET .. EX, so redis expires entries itself
    async fn upsert(&self, entry: &ProxyCacheEntry) -> Result<(), StoreError> {
        let json = serde_json::to_string(entry)?;
        let ttl = (entry.expires_at - entry.created_at).num_seconds().max(1) as u64;
        let mut conn = self.connection().await?;
        with_timeout(conn.set_ex::<_, _, ()>(Self::key(&entry.handle), json, ttl)).await
    }

    async fn get(&self, handle: &str) -> Result<Option<ProxyCacheEntry>, StoreError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = with_timeout(conn.get(Self::key(handle))).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        with_timeout(conn.del::<_, ()>(Self::key(handle))).await
    }
}
