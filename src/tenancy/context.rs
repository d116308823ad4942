//! Tenant configuration documents and the resolved [`TenantContext`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Requests per second granted when a tenant document sets none.
pub const DEFAULT_RPS: f64 = 50.0;
/// Consecutive failures that open a tenant's breaker by default.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
/// Default breaker reset window.
pub const DEFAULT_RESET_MS: u64 = 10_000;
/// Default freshness window for cached reads.
pub const DEFAULT_FRESH_TTL_MS: u64 = 30_000;
/// Default window during which stale reads are still served.
pub const DEFAULT_STALE_WINDOW_MS: u64 = 120_000;

/// On-disk tenant document (`<tenants_dir>/<tenant>.json`).
///
/// Every section is optional; zero or missing values fall back to defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TenantDocument {
    /// Tenant identifier; informational, the file name is authoritative.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub rate_limiter: Option<RateLimiterSection>,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerSection>,
    #[serde(default)]
    pub cache: Option<CacheSection>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RateLimiterSection {
    #[serde(default)]
    pub rps: Option<f64>,
    #[serde(default)]
    pub burst: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CircuitBreakerSection {
    #[serde(default)]
    pub failure_threshold: Option<u32>,
    #[serde(default)]
    pub reset_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default)]
    pub customer_lookup_ttl_ms: Option<u64>,
    #[serde(default)]
    pub stale_while_revalidate_ms: Option<u64>,
}

/// Token bucket parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitSettings {
    /// Refill rate in tokens per second.
    pub rps: f64,
    /// Bucket capacity.
    pub burst: f64,
}

impl RateLimitSettings {
    /// Build settings, replacing non-positive values with defaults
    /// (`rps = 50`, `burst = 2 × rps`).
    pub fn new(rps: Option<f64>, burst: Option<f64>) -> Self {
        let rps = rps.filter(|v| v.is_finite() && *v > 0.0).unwrap_or(DEFAULT_RPS);
        let burst = burst
            .filter(|v| v.is_finite() && *v >= 1.0)
            .unwrap_or(rps * 2.0)
            .max(1.0);
        Self { rps, burst }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Circuit breaker parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures before opening.
    pub threshold: u32,
    /// Time the breaker stays open before admitting a probe.
    pub reset: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_FAILURE_THRESHOLD,
            reset: Duration::from_millis(DEFAULT_RESET_MS),
        }
    }
}

/// Stale-while-revalidate parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Entries younger than this are served without a fetch.
    pub fresh_ttl: Duration,
    /// Entries younger than this (but not fresh) are served and refreshed.
    pub stale_window: Duration,
}

impl CacheSettings {
    /// Build settings; the stale window never ends before the fresh window.
    pub fn new(fresh_ttl: Duration, stale_window: Duration) -> Self {
        Self {
            fresh_ttl,
            stale_window: stale_window.max(fresh_ttl),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_FRESH_TTL_MS),
            Duration::from_millis(DEFAULT_STALE_WINDOW_MS),
        )
    }
}

/// Resolved per-tenant configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    pub id: String,
    pub rate_limit: RateLimitSettings,
    pub breaker: BreakerSettings,
    pub cache: CacheSettings,
}

impl TenantContext {
    /// A tenant with all defaults.
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rate_limit: RateLimitSettings::default(),
            breaker: BreakerSettings::default(),
            cache: CacheSettings::default(),
        }
    }

    /// Resolve a tenant document.
    pub fn from_document(id: impl Into<String>, doc: &TenantDocument) -> Self {
        let rate = doc.rate_limiter.clone().unwrap_or_default();
        let breaker = doc.circuit_breaker.clone().unwrap_or_default();
        let cache = doc.cache.clone().unwrap_or_default();

        let fresh = cache
            .customer_lookup_ttl_ms
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_FRESH_TTL_MS);
        let stale = cache
            .stale_while_revalidate_ms
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_STALE_WINDOW_MS);

        Self {
            id: id.into(),
            rate_limit: RateLimitSettings::new(rate.rps, rate.burst),
            breaker: BreakerSettings {
                threshold: breaker
                    .failure_threshold
                    .filter(|v| *v > 0)
                    .unwrap_or(DEFAULT_FAILURE_THRESHOLD),
                reset: Duration::from_millis(
                    breaker.reset_ms.filter(|v| *v > 0).unwrap_or(DEFAULT_RESET_MS),
                ),
            },
            cache: CacheSettings::new(Duration::from_millis(fresh), Duration::from_millis(stale)),
        }
    }
}
