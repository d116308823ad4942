//! External store connections and the tiered stores built on them.
//!
//! # Data Flow
//! ```text
//! [stores] config
//!     → connect Postgres (optional, bounded by connect_timeout_ms)
//!     → connect Redis (optional, bounded by connect_timeout_ms)
//!     → idempotency: Postgres → Redis → memory
//!     → cache:       Redis → memory
//!     → outbox:      Postgres or memory
//! ```
//!
//! Tier selection happens once at startup. An unreachable store is skipped
//! with a warning; at runtime a failing call degrades to the next tier.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use redis::aio::MultiplexedConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::cache::{CacheBackend, MemoryCache, RedisCache, SwrCache};
use crate::config::schema::StoresConfig;
use crate::idempotency::{
    IdempotencyBackend, IdempotencyStore, PostgresIdempotency, RedisIdempotency,
};
use crate::outbox::{MemoryOutbox, Outbox, PostgresOutbox};
use crate::resilience::{with_deadline, DeadlineExceeded};

/// Errors raised by store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Timeout(#[from] DeadlineExceeded),
}

/// Run a store call under `limit`, folding a timeout into [`StoreError`].
pub async fn bounded<T, F>(operation: &'static str, limit: Duration, fut: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    with_deadline(operation, limit, fut).await?
}

/// Fires on every `every`-th write; stores use it to sweep expired entries.
#[derive(Debug)]
pub struct PruneSchedule {
    every: u64,
    writes: AtomicU64,
}

impl PruneSchedule {
    pub const DEFAULT_EVERY: u64 = 256;

    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            writes: AtomicU64::new(0),
        }
    }

    /// Count one write; true when a sweep is due.
    pub fn tick(&self) -> bool {
        self.writes.fetch_add(1, Ordering::Relaxed) % self.every == self.every - 1
    }
}

impl Default for PruneSchedule {
    fn default() -> Self {
        Self::new(Self::DEFAULT_EVERY)
    }
}

/// Milliseconds since the Unix epoch.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

const SCHEMA: &[&str] = &[
    r"
create table if not exists idempotency_keys (
    key text primary key,
    request_hash text not null,
    status integer not null,
    payload jsonb not null,
    created_at timestamptz not null default now(),
    expires_at timestamptz not null
)",
    r"
create table if not exists outbox (
    id bigserial primary key,
    tenant_id text not null,
    tool text not null,
    payload jsonb not null,
    created_at timestamptz not null default now(),
    dispatched boolean not null default false
)",
];

/// Live connections to the optional external stores.
#[derive(Clone, Default)]
pub struct StoreConnections {
    pub postgres: Option<PgPool>,
    pub redis: Option<MultiplexedConnection>,
}

impl StoreConnections {
    /// Connect to every configured store, skipping the unreachable ones.
    pub async fn connect(config: &StoresConfig) -> Self {
        let limit = Duration::from_millis(config.connect_timeout_ms);
        let mut connections = Self::default();

        if let Some(url) = &config.database_url {
            match connect_postgres(url, limit).await {
                Ok(pool) => {
                    tracing::info!("Postgres store connected");
                    connections.postgres = Some(pool);
                }
                Err(e) => tracing::warn!(error = %e, "Postgres unavailable; continuing without it"),
            }
        }

        if let Some(url) = &config.redis_url {
            match connect_redis(url, limit).await {
                Ok(conn) => {
                    tracing::info!("Redis store connected");
                    connections.redis = Some(conn);
                }
                Err(e) => tracing::warn!(error = %e, "Redis unavailable; continuing without it"),
            }
        }

        connections
    }
}

async fn connect_postgres(url: &str, limit: Duration) -> Result<PgPool, StoreError> {
    let pool = bounded("postgres connect", limit, async {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(limit)
            .connect(url)
            .await?;
        Ok::<_, StoreError>(pool)
    })
    .await?;

    for statement in SCHEMA.iter().copied() {
        bounded("postgres schema", limit, async {
            sqlx::query(statement).execute(&pool).await?;
            Ok::<_, StoreError>(())
        })
        .await?;
    }
    Ok(pool)
}

async fn connect_redis(url: &str, limit: Duration) -> Result<MultiplexedConnection, StoreError> {
    let client = redis::Client::open(url)?;
    bounded("redis connect", limit, async {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok::<_, StoreError>(conn)
    })
    .await
}

/// The tiered stores used by the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub idempotency: Arc<IdempotencyStore>,
    pub cache: Arc<SwrCache>,
    pub outbox: Arc<dyn Outbox>,
    /// Bound applied to every store call made by the pipeline.
    pub call_timeout: Duration,
}

impl Stores {
    /// Process-local stores only.
    pub fn in_memory(config: &StoresConfig) -> Self {
        Self::from_connections(&StoreConnections::default(), config)
    }

    /// Connect and build the tiers.
    pub async fn connect(config: &StoresConfig) -> Self {
        let connections = StoreConnections::connect(config).await;
        Self::from_connections(&connections, config)
    }

    /// Build the tiers over already-established connections.
    pub fn from_connections(connections: &StoreConnections, config: &StoresConfig) -> Self {
        let call_timeout = Duration::from_millis(config.store_timeout_ms);
        let ttl = Duration::from_secs(config.idempotency_ttl_secs);

        let mut idempotency_tiers: Vec<Arc<dyn IdempotencyBackend>> = Vec::new();
        let mut cache_tiers: Vec<Arc<dyn CacheBackend>> = Vec::new();
        if let Some(pool) = &connections.postgres {
            idempotency_tiers.push(Arc::new(PostgresIdempotency::new(pool.clone())));
        }
        if let Some(conn) = &connections.redis {
            idempotency_tiers.push(Arc::new(RedisIdempotency::new(conn.clone())));
            cache_tiers.push(Arc::new(RedisCache::new(conn.clone())));
        }
        cache_tiers.push(Arc::new(MemoryCache::new()));

        let outbox: Arc<dyn Outbox> = match &connections.postgres {
            Some(pool) => Arc::new(PostgresOutbox::new(pool.clone())),
            None => Arc::new(MemoryOutbox::new()),
        };

        let idempotency = IdempotencyStore::new(idempotency_tiers, ttl, call_timeout);
        tracing::info!(
            idempotency = ?idempotency.backend_names(),
            outbox = outbox.name(),
            "Stores initialized"
        );

        Self {
            idempotency: Arc::new(idempotency),
            cache: Arc::new(SwrCache::new(cache_tiers, call_timeout)),
            outbox,
            call_timeout,
        }
    }

    /// Replace the outbox (tests inspect a shared [`MemoryOutbox`]).
    pub fn with_outbox(mut self, outbox: Arc<dyn Outbox>) -> Self {
        self.outbox = outbox;
        self
    }
}
