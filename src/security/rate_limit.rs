//! Per-tenant token bucket rate limiting.

use dashmap::DashMap;
use tokio::time::Instant;

use crate::tenancy::RateLimitSettings;

/// Admission refused because the tenant's bucket is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimited {
    /// Time until one token is available.
    pub retry_after_ms: u64,
}

/// A token bucket. Invariant: `0 <= tokens <= burst`.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, settings: &RateLimitSettings) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * settings.rps).clamp(0.0, settings.burst);
        self.last_update = now;
    }

    fn try_acquire(&mut self, settings: &RateLimitSettings) -> Result<(), RateLimited> {
        self.refill(settings);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            let wait_ms = ((1.0 - self.tokens) * 1000.0 / settings.rps).ceil();
            Err(RateLimited {
                retry_after_ms: (wait_ms as u64).max(1),
            })
        }
    }
}

/// Tenant-indexed token buckets.
///
/// Each tenant's bucket is updated under its own map entry lock; tenants
/// never contend with each other.
#[derive(Debug, Default)]
pub struct TenantRateLimiter {
    buckets: DashMap<String, TokenBucket>,
}

impl TenantRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one token for `tenant`, creating a full bucket on first use.
    pub fn admit(&self, tenant: &str, settings: &RateLimitSettings) -> Result<(), RateLimited> {
        let mut bucket = self
            .buckets
            .entry(tenant.to_string())
            .or_insert_with(|| TokenBucket::new(settings.burst));
        let result = bucket.try_acquire(settings);
        if let Err(limited) = result {
            tracing::warn!(tenant = %tenant, retry_after_ms = limited.retry_after_ms, "Rate limit exceeded");
        }
        result
    }

    /// Tokens currently available to `tenant` (after refill), if seen.
    pub fn tokens(&self, tenant: &str, settings: &RateLimitSettings) -> Option<f64> {
        self.buckets.get_mut(tenant).map(|mut bucket| {
            bucket.refill(settings);
            bucket.tokens
        })
    }
}
