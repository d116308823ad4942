//! Per-tenant circuit breaker.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: provider assumed down, requests fail fast
//! - Half-Open: the first admission after the reset window is a probe
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: first admission after reset window
//! Half-Open → Closed: probe succeeds
//! Half-Open → Open: probe fails (opened_at re-stamped)
//! ```
//!
//! One breaker per tenant, shared by every tool of that tenant. Only one
//! probe is admitted in Half-Open; concurrent callers keep failing fast
//! until the probe reports back.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::tenancy::BreakerSettings;

/// Admission refused because the tenant's breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    /// Time until the next probe may be admitted.
    pub retry_after_ms: u64,
}

#[derive(Debug, Default)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Point-in-time view of one tenant's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Consecutive failures recorded.
    pub failures: u32,
    /// Whether the breaker is currently open.
    pub open: bool,
    /// Whether a half-open probe is outstanding.
    pub probing: bool,
}

/// Tenant-indexed circuit breakers.
#[derive(Debug, Default)]
pub struct TenantCircuitBreakers {
    states: DashMap<String, BreakerState>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl TenantCircuitBreakers {
    /// Create an empty breaker arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a request for `tenant`, or fail fast if the breaker is open.
    ///
    /// The returned permit must be settled with [`BreakerPermit::record_success`]
    /// or [`BreakerPermit::record_failure`] once the handler outcome is known.
    /// Dropping it unsettled releases a half-open probe slot without touching
    /// the counters.
    pub fn admit(
        self: &Arc<Self>,
        tenant: &str,
        settings: &BreakerSettings,
    ) -> Result<BreakerPermit, CircuitOpen> {
        let mut state = self.states.entry(tenant.to_string()).or_default();
        let mut probe = false;

        if let Some(opened_at) = state.opened_at {
            let elapsed = Instant::now().saturating_duration_since(opened_at);
            if elapsed < settings.reset {
                return Err(CircuitOpen {
                    retry_after_ms: millis(settings.reset - elapsed),
                });
            }
            if state.probe_in_flight {
                return Err(CircuitOpen {
                    retry_after_ms: millis(settings.reset),
                });
            }
            state.probe_in_flight = true;
            probe = true;
            tracing::info!(tenant = %tenant, "Circuit half-open, admitting probe");
        }

        Ok(BreakerPermit {
            breakers: Arc::clone(self),
            tenant: tenant.to_string(),
            threshold: settings.threshold,
            probe,
            settled: false,
        })
    }

    /// Current state for `tenant`, if it has been seen.
    pub fn snapshot(&self, tenant: &str) -> Option<BreakerSnapshot> {
        self.states.get(tenant).map(|state| BreakerSnapshot {
            failures: state.failures,
            open: state.opened_at.is_some(),
            probing: state.probe_in_flight,
        })
    }

    fn on_success(&self, tenant: &str) {
        let mut state = self.states.entry(tenant.to_string()).or_default();
        if state.opened_at.is_some() {
            tracing::info!(tenant = %tenant, "Circuit closed");
        }
        *state = BreakerState::default();
    }

    fn on_failure(&self, tenant: &str, threshold: u32, probe: bool) {
        let mut state = self.states.entry(tenant.to_string()).or_default();
        state.failures = state.failures.saturating_add(1);
        if probe {
            state.probe_in_flight = false;
        }
        if state.failures >= threshold {
            if state.opened_at.is_none() {
                tracing::warn!(tenant = %tenant, failures = state.failures, "Circuit opened");
            }
            state.opened_at = Some(Instant::now());
        }
    }

    fn release_probe(&self, tenant: &str) {
        if let Some(mut state) = self.states.get_mut(tenant) {
            state.probe_in_flight = false;
        }
    }
}

/// A RAII admission ticket for one request.
#[derive(Debug)]
pub struct BreakerPermit {
    breakers: Arc<TenantCircuitBreakers>,
    tenant: String,
    threshold: u32,
    probe: bool,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Report a successful dispatch.
    pub fn record_success(mut self) {
        self.settled = true;
        self.breakers.on_success(&self.tenant);
    }

    /// Report a failed dispatch.
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breakers.on_failure(&self.tenant, self.threshold, self.probe);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breakers.release_probe(&self.tenant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> BreakerSettings {
        BreakerSettings {
            threshold: 3,
            reset: Duration::from_millis(1_000),
        }
    }

    fn fail_n(breakers: &Arc<TenantCircuitBreakers>, n: u32) {
        for _ in 0..n {
            breakers.admit("t1", &settings()).unwrap().record_failure();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold() {
        let breakers = Arc::new(TenantCircuitBreakers::new());
        fail_n(&breakers, 2);
        assert!(breakers.admit("t1", &settings()).is_ok());

        fail_n(&breakers, 1);
        let err = breakers.admit("t1", &settings()).unwrap_err();
        assert_eq!(err.retry_after_ms, 1_000);
        assert!(breakers.snapshot("t1").unwrap().open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_probe_after_reset() {
        let breakers = Arc::new(TenantCircuitBreakers::new());
        fail_n(&breakers, 3);

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(breakers.admit("t1", &settings()).is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        let probe = breakers.admit("t1", &settings()).unwrap();
        assert!(probe.is_probe());
        assert!(breakers.admit("t1", &settings()).is_err());

        probe.record_success();
        let snapshot = breakers.snapshot("t1").unwrap();
        assert_eq!(snapshot.failures, 0);
        assert!(!snapshot.open);
        assert!(breakers.admit("t1", &settings()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let breakers = Arc::new(TenantCircuitBreakers::new());
        fail_n(&breakers, 3);
        tokio::time::advance(Duration::from_secs(1)).await;

        breakers.admit("t1", &settings()).unwrap().record_failure();
        let err = breakers.admit("t1", &settings()).unwrap_err();
        assert_eq!(err.retry_after_ms, 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_probe_releases_slot() {
        let breakers = Arc::new(TenantCircuitBreakers::new());
        fail_n(&breakers, 3);
        tokio::time::advance(Duration::from_secs(1)).await;

        drop(breakers.admit("t1", &settings()).unwrap());
        assert!(!breakers.snapshot("t1").unwrap().probing);
        assert!(breakers.admit("t1", &settings()).unwrap().is_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tenants_are_isolated() {
        let breakers = Arc::new(TenantCircuitBreakers::new());
        fail_n(&breakers, 3);
        assert!(breakers.admit("t1", &settings()).is_err());
        assert!(breakers.admit("t2", &settings()).is_ok());
    }
}
