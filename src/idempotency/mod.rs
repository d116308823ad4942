//! Write deduplication.
//!
//! # Data Flow
//! ```text
//! Write tool call with idempotency key
//!     → hashing.rs (canonical hash of {tool, tenant, body})
//!     → store.rs get (Postgres → Redis → memory, first hit wins)
//!         hit, same hash      → replay recorded status/payload
//!         hit, different hash → conflict
//!         miss                → dispatch, then store.rs set
//! ```
//!
//! Lookup, dispatch and set run under a per-key lock (`store.rs` `lock`), so
//! one process never dispatches the same key twice.
//!
//! # Design Decisions
//! - Records are immutable until TTL expiry (insert-if-absent everywhere)
//! - Every backend call has a deadline; failures fall through to the next tier
//! - The in-process tier is always present and always last

pub mod hashing;
pub mod memory;
pub mod postgres;
pub mod redis;
pub mod store;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::StoreError;

pub use hashing::{canonical_hash, request_hash};
pub use memory::MemoryIdempotency;
pub use postgres::PostgresIdempotency;
pub use self::redis::RedisIdempotency;
pub use store::{IdempotencyStore, KeyLock, SetOutcome};

/// Identity of a write: (tenant, tool, caller-chosen key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub tenant: String,
    pub tool: String,
    pub key: String,
}

impl IdempotencyKey {
    pub fn new(tenant: impl Into<String>, tool: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            tool: tool.into(),
            key: key.into(),
        }
    }

    /// Key used by every backend.
    pub fn storage_key(&self) -> String {
        format!("idem:{}:{}:{}", self.tenant, self.tool, self.key)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// The recorded outcome of a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub request_hash: String,
    pub status: u16,
    pub payload: Value,
    pub created_at_ms: u64,
}

/// One idempotency storage tier.
#[async_trait]
pub trait IdempotencyBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Insert `record` unless a live record exists; returns whether it was written.
    async fn put(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError>;
}
