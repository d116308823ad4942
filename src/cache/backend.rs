//! Cache storage tiers.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;

use crate::store::{PruneSchedule, StoreError};

/// A cached payload and the Unix-millisecond time it was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: Value,
    pub ts: u64,
}

/// One cache storage tier.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError>;

    /// Store `entry`, letting the tier drop it after `ttl`.
    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), StoreError>;
}

/// In-process tier. Expired entries are swept every few hundred writes.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, (CacheEntry, Instant)>,
    sweeps: PruneSchedule,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&self, now: Instant) {
        let before = self.entries.len();
        self.entries.retain(|_, stored| stored.1 > now);
        let pruned = before.saturating_sub(self.entries.len());
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired cache entries");
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(stored) if stored.1 > now => Some(stored.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if hit.is_none() {
            self.entries.remove_if(key, |_, stored| stored.1 <= now);
        }
        Ok(hit)
    }

    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        if self.sweeps.tick() {
            self.prune(now);
        }
        self.entries.insert(key.to_string(), (entry.clone(), now + ttl));
        Ok(())
    }
}

/// Shared tier: JSON `{payload, ts}` values with `SET EX`.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(entry)?;
        let secs = ttl.as_millis().div_ceil(1000).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(u64::try_from(secs).unwrap_or(u64::MAX))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
