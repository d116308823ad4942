use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::Row as _;

use crate::idempotency::{IdempotencyBackend, IdempotencyKey, IdempotencyRecord};
use crate::store::{PruneSchedule, StoreError};

/// Durable idempotency tier (`idempotency_keys` table).
///
/// Expired rows are deleted every few hundred writes.
#[derive(Debug)]
pub struct PostgresIdempotency {
    pool: PgPool,
    sweeps: PruneSchedule,
}

impl PostgresIdempotency {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sweeps: PruneSchedule::default(),
        }
    }

    /// Delete expired rows; returns how many went.
    pub async fn sweep_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("delete from idempotency_keys where expires_at <= now()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyBackend for PostgresIdempotency {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query(
            r"
select request_hash, status, payload,
       (extract(epoch from created_at) * 1000)::bigint as created_at_ms
from idempotency_keys
where key = $1
  and expires_at > now()
",
        )
        .bind(key.storage_key())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: i32 = row.try_get("status")?;
        let created_at_ms: i64 = row.try_get("created_at_ms")?;
        Ok(Some(IdempotencyRecord {
            request_hash: row.try_get("request_hash")?,
            status: u16::try_from(status).unwrap_or(500),
            payload: row.try_get("payload")?,
            created_at_ms: u64::try_from(created_at_ms).unwrap_or(0),
        }))
    }

    async fn put(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        if self.sweeps.tick() {
            match self.sweep_expired().await {
                Ok(0) => {}
                Ok(pruned) => tracing::debug!(pruned, "Pruned expired idempotency rows"),
                Err(e) => tracing::warn!(error = %e, "Idempotency sweep failed"),
            }
        }

        // Expired rows may be overwritten; live rows are never touched.
        let result = sqlx::query(
            r"
insert into idempotency_keys (key, request_hash, status, payload, created_at, expires_at)
values ($1, $2, $3, $4, now(), now() + make_interval(secs => $5))
on conflict (key) do update
set request_hash = excluded.request_hash,
    status = excluded.status,
    payload = excluded.payload,
    created_at = excluded.created_at,
    expires_at = excluded.expires_at
where idempotency_keys.expires_at <= now()
",
        )
        .bind(key.storage_key())
        .bind(&record.request_hash)
        .bind(i32::from(record.status))
        .bind(&record.payload)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
