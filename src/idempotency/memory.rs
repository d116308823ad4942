use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::idempotency::{IdempotencyBackend, IdempotencyKey, IdempotencyRecord};
use crate::store::{PruneSchedule, StoreError};

#[derive(Debug, Clone)]
struct StoredRecord {
    record: IdempotencyRecord,
    expires_at: Instant,
}

/// In-process idempotency tier. Expired records are pruned periodically.
#[derive(Debug, Default)]
pub struct MemoryIdempotency {
    records: DashMap<String, StoredRecord>,
    sweeps: PruneSchedule,
}

impl MemoryIdempotency {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn prune(&self, now: Instant) {
        let before = self.records.len();
        self.records.retain(|_, stored| stored.expires_at > now);
        let pruned = before.saturating_sub(self.records.len());
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned expired idempotency records");
        }
    }
}

#[async_trait]
impl IdempotencyBackend for MemoryIdempotency {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        let now = Instant::now();
        Ok(self
            .records
            .get(&key.storage_key())
            .filter(|stored| stored.expires_at > now)
            .map(|stored| stored.record.clone()))
    }

    async fn put(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        if self.sweeps.tick() {
            self.prune(now);
        }

        let stored = StoredRecord {
            record: record.clone(),
            expires_at: now + ttl,
        };
        let inserted = match self.records.entry(key.storage_key()) {
            Entry::Occupied(mut existing) => {
                if existing.get().expires_at > now {
                    false
                } else {
                    existing.insert(stored);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(stored);
                true
            }
        };
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PRUNE_EVERY: u64 = PruneSchedule::DEFAULT_EVERY;

    fn record(hash: &str) -> IdempotencyRecord {
        IdempotencyRecord {
            request_hash: hash.to_string(),
            status: 200,
            payload: json!({"ok": true}),
            created_at_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_insert_if_absent_until_expiry() {
        let store = MemoryIdempotency::new();
        let key = IdempotencyKey::new("demo", "crm.create_case", "k1");
        let ttl = Duration::from_secs(60);

        assert!(store.put(&key, &record("a"), ttl).await.unwrap());
        assert!(!store.put(&key, &record("b"), ttl).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().unwrap().request_hash, "a");

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(store.put(&key, &record("b"), ttl).await.unwrap());
        assert_eq!(store.get(&key).await.unwrap().unwrap().request_hash, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prunes_expired_records() {
        let store = MemoryIdempotency::new();
        let ttl = Duration::from_secs(60);
        for i in 0..10 {
            let key = IdempotencyKey::new("demo", "t", format!("old-{i}"));
            store.put(&key, &record("x"), ttl).await.unwrap();
        }
        tokio::time::advance(Duration::from_secs(120)).await;

        for i in 0..PRUNE_EVERY {
            let key = IdempotencyKey::new("demo", "t", format!("new-{i}"));
            store.put(&key, &record("x"), ttl).await.unwrap();
        }
        assert_eq!(store.len(), PRUNE_EVERY as usize);
    }
}
