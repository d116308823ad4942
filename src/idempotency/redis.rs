use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use crate::idempotency::{IdempotencyBackend, IdempotencyKey, IdempotencyRecord};
use crate::store::StoreError;

/// Shared idempotency tier: one JSON value per key, written with `SET NX EX`.
#[derive(Clone)]
pub struct RedisIdempotency {
    conn: MultiplexedConnection,
}

impl RedisIdempotency {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl IdempotencyBackend for RedisIdempotency {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key.storage_key())
            .query_async(&mut conn)
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(record)?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key.storage_key())
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
