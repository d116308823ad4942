//! Stale-while-revalidate read cache.
//!
//! ```text
//! age <  fresh_ttl              → serve, no fetch
//! age in [fresh_ttl, stale_win) → serve stale, one background refresh per key
//! age >= stale_window / miss    → fetch inline (single-flight per key)
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::cache::backend::{CacheBackend, CacheEntry};
use crate::observability::metrics;
use crate::store::bounded;
use crate::tenancy::CacheSettings;

/// How a lookup was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a fresh entry.
    Fresh,
    /// Served from a stale entry; a refresh was scheduled or is running.
    Stale,
    /// Fetched inline because the entry was missing or expired.
    Fetched,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Fresh => "fresh",
            CacheOutcome::Stale => "stale",
            CacheOutcome::Fetched => "fetched",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub payload: Value,
    pub outcome: CacheOutcome,
}

/// Unix-millisecond clock that follows tokio's (pausable) time.
#[derive(Debug, Clone, Copy)]
struct Clock {
    base_unix_ms: u64,
    base: Instant,
}

impl Clock {
    fn new() -> Self {
        let base_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            base_unix_ms,
            base: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        let elapsed = u64::try_from(self.base.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.base_unix_ms.saturating_add(elapsed)
    }
}

/// Tiered SWR cache keyed by `(tenant, key)`.
pub struct SwrCache {
    tiers: Vec<Arc<dyn CacheBackend>>,
    call_timeout: Duration,
    clock: Clock,
    /// Keys with a background refresh in flight.
    refreshing: DashMap<String, ()>,
    /// Per-key fill locks for inline fetches.
    fills: DashMap<String, Arc<Mutex<()>>>,
}

fn storage_key(tenant: &str, key: &str) -> String {
    format!("swr:{tenant}:{key}")
}

impl SwrCache {
    /// Cache over `tiers`, strongest first.
    pub fn new(tiers: Vec<Arc<dyn CacheBackend>>, call_timeout: Duration) -> Self {
        Self {
            tiers,
            call_timeout,
            clock: Clock::new(),
            refreshing: DashMap::new(),
            fills: DashMap::new(),
        }
    }

    /// Look `key` up for `tenant`, calling `fetch` when the entry is missing,
    /// expired or stale (the latter in the background).
    ///
    /// Fetch errors are returned only for inline fetches; background refresh
    /// failures are logged and the stale entry is kept.
    pub async fn get<F, Fut, E>(
        self: &Arc<Self>,
        tenant: &str,
        key: &str,
        settings: &CacheSettings,
        fetch: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let storage_key = storage_key(tenant, key);

        if let Some(entry) = self.read(&storage_key).await {
            let age = self.clock.now_ms().saturating_sub(entry.ts);
            if age < millis(settings.fresh_ttl) {
                return Ok(self.served(entry.payload, CacheOutcome::Fresh));
            }
            if age < millis(settings.stale_window) {
                self.spawn_refresh(storage_key, *settings, fetch);
                return Ok(self.served(entry.payload, CacheOutcome::Stale));
            }
        }

        let lock = Arc::clone(
            self.fills
                .entry(storage_key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let result = {
            let _fill = lock.lock().await;
            self.fill(&storage_key, settings, fetch).await
        };
        drop(lock);
        self.fills
            .remove_if(&storage_key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    async fn fill<F, Fut, E>(
        &self,
        storage_key: &str,
        settings: &CacheSettings,
        fetch: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        // Another caller may have filled the key while we waited.
        if let Some(entry) = self.read(storage_key).await {
            let age = self.clock.now_ms().saturating_sub(entry.ts);
            if age < millis(settings.fresh_ttl) {
                return Ok(self.served(entry.payload, CacheOutcome::Fresh));
            }
        }

        let payload = fetch().await?;
        self.write(storage_key, &payload, settings.stale_window).await;
        Ok(self.served(payload, CacheOutcome::Fetched))
    }

    fn spawn_refresh<F, Fut, E>(self: &Arc<Self>, storage_key: String, settings: CacheSettings, fetch: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        if self.refreshing.insert(storage_key.clone(), ()).is_some() {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            match fetch().await {
                Ok(payload) => {
                    cache
                        .write(&storage_key, &payload, settings.stale_window)
                        .await;
                    tracing::debug!(key = %storage_key, "Cache entry revalidated");
                }
                Err(e) => tracing::warn!(key = %storage_key, error = %e, "Cache revalidation failed"),
            }
            cache.refreshing.remove(&storage_key);
        });
    }

    fn served(&self, payload: Value, outcome: CacheOutcome) -> CacheLookup {
        metrics::record_cache_lookup(outcome.as_str());
        CacheLookup { payload, outcome }
    }

    async fn read(&self, storage_key: &str) -> Option<CacheEntry> {
        for tier in &self.tiers {
            match bounded("cache get", self.call_timeout, tier.get(storage_key)).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(backend = tier.name(), error = %e, "Cache read failed; trying next tier");
                    metrics::record_store_fallback("cache", tier.name());
                }
            }
        }
        None
    }

    async fn write(&self, storage_key: &str, payload: &Value, ttl: Duration) {
        let entry = CacheEntry {
            payload: payload.clone(),
            ts: self.clock.now_ms(),
        };
        self.write_entry(storage_key, &entry, ttl).await;
    }

    async fn write_entry(&self, storage_key: &str, entry: &CacheEntry, ttl: Duration) {
        for tier in &self.tiers {
            match bounded("cache set", self.call_timeout, tier.put(storage_key, entry, ttl)).await {
                Ok(()) => return,
                Err(e) => {
                    tracing::warn!(backend = tier.name(), error = %e, "Cache write failed; trying next tier");
                    metrics::record_store_fallback("cache", tier.name());
                }
            }
        }
    }

    /// Store `payload` as if it was produced `age` ago.
    pub async fn seed(&self, tenant: &str, key: &str, payload: Value, age: Duration, ttl: Duration) {
        let entry = CacheEntry {
            payload,
            ts: self.clock.now_ms().saturating_sub(millis(age)),
        };
        self.write_entry(&storage_key(tenant, key), &entry, ttl).await;
    }

    /// Whether a background refresh is running for `(tenant, key)`.
    pub fn is_refreshing(&self, tenant: &str, key: &str) -> bool {
        self.refreshing.contains_key(&storage_key(tenant, key))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Arc<SwrCache> {
        Arc::new(SwrCache::new(
            vec![Arc::new(MemoryCache::new()) as Arc<dyn CacheBackend>],
            Duration::from_millis(100),
        ))
    }

    fn settings() -> CacheSettings {
        CacheSettings::new(Duration::from_secs(30), Duration::from_secs(120))
    }

    fn counting_fetch(
        calls: &Arc<AtomicUsize>,
        value: Value,
    ) -> impl FnOnce() -> std::future::Ready<Result<Value, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(value))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_entry_never_fetches() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .seed("t1", "q", json!("cached"), Duration::from_secs(10), Duration::from_secs(120))
            .await;

        let lookup = cache
            .get("t1", "q", &settings(), counting_fetch(&calls, json!("new")))
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup { payload: json!("cached"), outcome: CacheOutcome::Fresh });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_entry_refreshes_once() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .seed("t1", "q", json!("old"), Duration::from_secs(60), Duration::from_secs(120))
            .await;

        let gate = Arc::new(tokio::sync::Notify::new());
        let slow_fetch = {
            let calls = Arc::clone(&calls);
            let gate = Arc::clone(&gate);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                gate.notified().await;
                Ok::<_, String>(json!("new"))
            }
        };

        let first = cache.get("t1", "q", &settings(), slow_fetch).await.unwrap();
        assert_eq!(first.outcome, CacheOutcome::Stale);
        assert_eq!(first.payload, json!("old"));
        tokio::task::yield_now().await;
        assert!(cache.is_refreshing("t1", "q"));

        let second = cache
            .get("t1", "q", &settings(), counting_fetch(&calls, json!("other")))
            .await
            .unwrap();
        assert_eq!(second.outcome, CacheOutcome::Stale);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.notify_one();
        while cache.is_refreshing("t1", "q") {
            tokio::task::yield_now().await;
        }
        let third = cache
            .get("t1", "q", &settings(), counting_fetch(&calls, json!("other")))
            .await
            .unwrap();
        assert_eq!(third, CacheLookup { payload: json!("new"), outcome: CacheOutcome::Fresh });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_fetches_inline() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .seed("t1", "q", json!("ancient"), Duration::from_secs(500), Duration::from_secs(600))
            .await;

        let lookup = cache
            .get("t1", "q", &settings(), counting_fetch(&calls, json!("new")))
            .await
            .unwrap();
        assert_eq!(lookup, CacheLookup { payload: json!("new"), outcome: CacheOutcome::Fetched });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_error_is_returned_on_miss() {
        let cache = cache();
        let result = cache
            .get("t1", "q", &settings(), || std::future::ready(Err::<Value, _>("boom".to_string())))
            .await;
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_single_flight() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cache
                    .get("t1", "q", &settings(), move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, String>(json!("filled"))
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap().payload, json!("filled"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenants_do_not_share_entries() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        cache
            .seed("t1", "q", json!("t1"), Duration::ZERO, Duration::from_secs(120))
            .await;

        let lookup = cache
            .get("t2", "q", &settings(), counting_fetch(&calls, json!("t2")))
            .await
            .unwrap();
        assert_eq!(lookup.payload, json!("t2"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
