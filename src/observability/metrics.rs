//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): tool calls by tool, status
//! - `gateway_request_duration_seconds` (histogram): latency by tool
//! - `gateway_rejections_total` (counter): short-circuited calls by reason
//! - `gateway_idempotent_replays_total` (counter): writes answered from the store
//! - `gateway_cache_lookups_total` (counter): SWR outcomes (fresh, stale, fetched)
//! - `gateway_store_fallbacks_total` (counter): backend errors that degraded a tier
//!
//! Recording is a no-op until a recorder is installed, so tests and
//! binaries without an exporter pay nothing.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

/// Record one completed tool call.
pub fn record_request(tool: &str, status: u16, started: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "tool" => tool.to_string())
        .record(started.elapsed().as_secs_f64());
}

/// Record a call rejected before dispatch.
pub fn record_rejection(reason: &'static str) {
    metrics::counter!("gateway_rejections_total", "reason" => reason).increment(1);
}

pub fn record_replay() {
    metrics::counter!("gateway_idempotent_replays_total").increment(1);
}

pub fn record_cache_lookup(outcome: &'static str) {
    metrics::counter!("gateway_cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Record a store backend failure that fell through to the next tier.
pub fn record_store_fallback(store: &'static str, backend: &'static str) {
    metrics::counter!(
        "gateway_store_fallbacks_total",
        "store" => store,
        "backend" => backend
    )
    .increment(1);
}

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Prometheus metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to install Prometheus recorder"),
    }
}
