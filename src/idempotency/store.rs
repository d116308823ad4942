//! The tiered idempotency store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::validation::MIN_IDEMPOTENCY_TTL_SECS;
use crate::idempotency::{IdempotencyBackend, IdempotencyKey, IdempotencyRecord, MemoryIdempotency};
use crate::observability::metrics;
use crate::store::bounded;

/// Result of [`IdempotencyStore::set`].
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    Stored,
    /// A live record was already present; it is left untouched.
    Existing(IdempotencyRecord),
    /// Every tier failed.
    Failed,
}

/// Exclusive hold on one idempotency key within this process.
///
/// Released on drop; the lock slot is removed once nobody waits on it.
pub struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    slot: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.slot, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Ranked idempotency backends; the in-process tier is always last.
pub struct IdempotencyStore {
    tiers: Vec<Arc<dyn IdempotencyBackend>>,
    ttl: Duration,
    call_timeout: Duration,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl IdempotencyStore {
    /// Build a store over `durable` tiers (strongest first) plus memory.
    ///
    /// `ttl` is raised to the 60 second floor when shorter.
    pub fn new(
        durable: Vec<Arc<dyn IdempotencyBackend>>,
        ttl: Duration,
        call_timeout: Duration,
    ) -> Self {
        let mut tiers = durable;
        tiers.push(Arc::new(MemoryIdempotency::new()));
        Self {
            tiers,
            ttl: ttl.max(Duration::from_secs(MIN_IDEMPOTENCY_TTL_SECS)),
            call_timeout,
            locks: DashMap::new(),
        }
    }

    /// Memory-only store.
    pub fn in_memory(ttl: Duration, call_timeout: Duration) -> Self {
        Self::new(Vec::new(), ttl, call_timeout)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn backend_names(&self) -> Vec<&'static str> {
        self.tiers.iter().map(|tier| tier.name()).collect()
    }

    /// Serialize writes on `key`: hold the returned lock across lookup,
    /// dispatch and [`Self::set`].
    pub async fn lock(&self, key: &IdempotencyKey) -> KeyLock<'_> {
        let slot = key.storage_key();
        let lock = Arc::clone(
            self.locks
                .entry(slot.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = lock.lock_owned().await;
        KeyLock {
            locks: &self.locks,
            slot,
            guard: Some(guard),
        }
    }

    /// Keys currently locked or awaited.
    pub fn locked_keys(&self) -> usize {
        self.locks.len()
    }

    /// First record found across tiers, strongest first.
    pub async fn get(&self, key: &IdempotencyKey) -> Option<IdempotencyRecord> {
        for tier in &self.tiers {
            match bounded("idempotency get", self.call_timeout, tier.get(key)).await {
                Ok(Some(record)) => return Some(record),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(backend = tier.name(), key = %key, error = %e, "Idempotency lookup failed; trying next tier");
                    metrics::record_store_fallback("idempotency", tier.name());
                }
            }
        }
        None
    }

    /// Write `record` to the first tier that accepts the call.
    ///
    /// When that tier already holds a live record (another process won the
    /// race), the stored record is returned instead.
    pub async fn set(&self, key: &IdempotencyKey, record: &IdempotencyRecord) -> SetOutcome {
        for tier in &self.tiers {
            match bounded("idempotency set", self.call_timeout, tier.put(key, record, self.ttl)).await {
                Ok(true) => return SetOutcome::Stored,
                Ok(false) => {
                    tracing::debug!(backend = tier.name(), key = %key, "Idempotency record already present");
                    return match bounded("idempotency get", self.call_timeout, tier.get(key)).await {
                        Ok(Some(existing)) => SetOutcome::Existing(existing),
                        // Expired between the two calls.
                        Ok(None) => SetOutcome::Stored,
                        Err(e) => {
                            tracing::warn!(backend = tier.name(), key = %key, error = %e, "Could not read back existing idempotency record");
                            SetOutcome::Failed
                        }
                    };
                }
                Err(e) => {
                    tracing::warn!(backend = tier.name(), key = %key, error = %e, "Idempotency write failed; trying next tier");
                    metrics::record_store_fallback("idempotency", tier.name());
                }
            }
        }
        SetOutcome::Failed
    }
}
