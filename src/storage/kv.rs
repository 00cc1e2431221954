use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::error::Result;

/// Minimal key-value contract shared by the Redis and in-process stores.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Unconditional write. `ttl_secs = None` keeps the value forever.
    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()>;

    /// Atomic write-if-absent. Returns `true` when this call created the key.
    async fn put_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn ping(&self) -> bool;
}

// ==================== REDIS ====================
#[derive(Clone)]
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = redis::aio::ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl_secs {
            cmd.arg("EX").arg(ttl.max(1));
        }
        let _: Option<String> = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut conn = self.conn.clone();
        // SET NX replies OK when written and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs.max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn ping(&self) -> bool {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

// ==================== IN-PROCESS ====================
/// Single-node store used when no Redis is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<HashMap<String, (String, Option<Instant>)>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl_secs: Option<u64>) -> Option<Instant> {
        ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl.max(1)))
    }

    fn is_live(entry: &(String, Option<Instant>), now: Instant) -> bool {
        entry.1.map(|deadline| deadline > now).unwrap_or(true)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if Self::is_live(entry, now) => Ok(Some(entry.0.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), (value.to_string(), Self::expiry(ttl_secs)));
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        if entries.get(key).is_some_and(|entry| Self::is_live(entry, now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            (value.to_string(), Self::expiry(Some(ttl_secs))),
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn ping(&self) -> bool {
        true
    }
}

// ==================== NAMESPACES ====================
/// Prefixes every key so several logical namespaces share one backend.
#[derive(Clone)]
pub struct KvNamespace {
    inner: Arc<dyn KvStore>,
    prefix: String,
}

impl KvNamespace {
    pub fn new(inner: Arc<dyn KvStore>, namespace: &str) -> Self {
        Self {
            inner,
            prefix: format!("{}:", namespace),
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.inner.get(&self.key(key)).await
    }

    pub async fn put(&self, key: &str, value: &str, ttl_secs: Option<u64>) -> Result<()> {
        self.inner.put(&self.key(key), value, ttl_secs).await
    }

    pub async fn put_if_absent(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        self.inner.put_if_absent(&self.key(key), value, ttl_secs).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(&self.key(key)).await
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.get(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                tracing::warn!("Discarding undecodable KV value key={}{} err={}", self.prefix, key, err);
                Ok(None)
            }
        }
    }

    pub async fn put_json<T: serde::Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| crate::error::AppError::Internal(format!("KV encode failed: {}", e)))?;
        self.put(key, &raw, ttl_secs).await
    }

    pub async fn ping(&self) -> bool {
        self.inner.ping().await
    }
}
