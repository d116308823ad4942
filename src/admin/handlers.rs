use std::time::UNIX_EPOCH;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::tenancy::is_valid_tenant_id;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub snapshot_version: u64,
    pub snapshot_loaded_at_ms: u64,
    pub tools: Vec<String>,
    pub tenants_loaded: Vec<String>,
    pub idempotency_backends: Vec<&'static str>,
    pub outbox_backend: &'static str,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let snapshot = state.pipeline.snapshots().current();
    let stores = state.pipeline.stores();
    let loaded_at_ms = snapshot
        .loaded_at
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        snapshot_version: snapshot.version,
        snapshot_loaded_at_ms: loaded_at_ms,
        tools: snapshot.registry.names(),
        tenants_loaded: snapshot.tenants.loaded_tenants(),
        idempotency_backends: stores.idempotency.backend_names(),
        outbox_backend: stores.outbox.name(),
    })
}

/// Resolved settings and live breaker/bucket state for one tenant.
pub async fn get_tenant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    if !is_valid_tenant_id(&id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let snapshot = state.pipeline.snapshots().current();
    let tenant = snapshot.tenants.tenant(&id).await.ok_or(StatusCode::NOT_FOUND)?;
    let breaker = state.pipeline.breaker_snapshot(&id);
    let tokens = state.pipeline.available_tokens(&id, &tenant.rate_limit);

    Ok(Json(json!({
        "tenant": tenant.id,
        "rate_limit": {
            "rps": tenant.rate_limit.rps,
            "burst": tenant.rate_limit.burst,
            "tokens": tokens,
        },
        "circuit_breaker": {
            "failure_threshold": tenant.breaker.threshold,
            "reset_ms": tenant.breaker.reset.as_millis() as u64,
            "failures": breaker.map(|b| b.failures).unwrap_or(0),
            "open": breaker.is_some_and(|b| b.open),
            "probing": breaker.is_some_and(|b| b.probing),
        },
        "cache": {
            "fresh_ttl_ms": tenant.cache.fresh_ttl.as_millis() as u64,
            "stale_window_ms": tenant.cache.stale_window.as_millis() as u64,
        },
    })))
}

/// Rebuild the snapshot from disk now.
pub async fn post_reload(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    match state.pipeline.snapshots().reload() {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(json!({ "version": snapshot.version, "tools": snapshot.registry.len() })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        ),
    }
}
