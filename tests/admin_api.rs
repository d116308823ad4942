//! Admin endpoints: auth, status, tenant inspection and reload.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;

use tool_gateway::config::{PathsConfig, SnapshotHandle};
use tool_gateway::handlers::HandlerSet;

mod common;
use common::{agent_call, send, GatewayBuilder, ADMIN_KEY, DEMO_POLICY, MANIFEST};

const DEMO_TENANT: &str = include_str!("../config/tenants/demo.json");

fn admin_request(method: &str, uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("authorization", format!("Bearer {key}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn write_config(dir: &Path) -> PathsConfig {
    let paths = PathsConfig {
        manifest: dir.join("tools.json"),
        tenants_dir: dir.join("tenants"),
        policies_dir: dir.join("policies"),
        watch: false,
    };
    fs::create_dir_all(&paths.tenants_dir).unwrap();
    fs::create_dir_all(&paths.policies_dir).unwrap();
    fs::write(&paths.manifest, MANIFEST).unwrap();
    fs::write(paths.tenants_dir.join("demo.json"), DEMO_TENANT).unwrap();
    fs::write(paths.policies_dir.join("demo.json"), DEMO_POLICY).unwrap();
    paths
}

#[tokio::test]
async fn test_admin_requires_key() {
    let gw = GatewayBuilder::new().admin().build();

    let res = send(&gw.router, admin_request("GET", "/admin/status", None)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = send(&gw.router, admin_request("GET", "/admin/status", Some("wrong"))).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);

    let res = send(&gw.router, admin_request("GET", "/admin/status", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "operational");
    assert_eq!(res.body["snapshot_version"], 1);
    assert!(res.body["tools"]
        .as_array()
        .unwrap()
        .contains(&json!("crm.create_case")));
    assert_eq!(res.body["idempotency_backends"], json!(["memory"]));
}

#[tokio::test]
async fn test_admin_routes_absent_when_disabled() {
    let gw = GatewayBuilder::new().build();
    let res = send(&gw.router, admin_request("GET", "/admin/status", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tenant_inspection() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_config(dir.path());
    let snapshots = Arc::new(SnapshotHandle::load(paths, HandlerSet::builtin()).unwrap());
    let gw = GatewayBuilder::new().admin().build_with(snapshots);

    let res = send(&gw.router, agent_call("meta.health", &json!({}), &[])).await;
    assert_eq!(res.status, StatusCode::OK);

    let res = send(&gw.router, admin_request("GET", "/admin/tenants/demo", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["rate_limit"]["burst"], 100.0);
    assert!(res.body["rate_limit"]["tokens"].is_number());
    assert_eq!(res.body["circuit_breaker"]["open"], false);
    assert_eq!(res.body["cache"]["fresh_ttl_ms"], 30_000);

    let res = send(&gw.router, admin_request("GET", "/admin/tenants/ghost", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let res = send(&gw.router, admin_request("GET", "/admin/tenants/..%2Fetc", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reload_swaps_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_config(dir.path());
    let snapshots = Arc::new(SnapshotHandle::load(paths.clone(), HandlerSet::builtin()).unwrap());
    let gw = GatewayBuilder::new().admin().build_with(snapshots);

    let lookup = json!({"query": "ada@example.com"});
    let res = send(&gw.router, agent_call("crm.lookup_customer", &lookup, &[])).await;
    assert_eq!(res.status, StatusCode::OK);

    fs::write(
        &paths.manifest,
        json!({"tools": [{"name": "meta.health", "side_effects": "read"}]}).to_string(),
    )
    .unwrap();
    let res = send(&gw.router, admin_request("POST", "/admin/reload", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["version"], 2);
    assert_eq!(res.body["tools"], 1);

    let res = send(&gw.router, agent_call("crm.lookup_customer", &lookup, &[])).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    fs::write(&paths.manifest, "{ not json").unwrap();
    let res = send(&gw.router, admin_request("POST", "/admin/reload", Some(ADMIN_KEY))).await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);

    // The last good snapshot keeps serving.
    let res = send(&gw.router, agent_call("meta.health", &json!({}), &[])).await;
    assert_eq!(res.status, StatusCode::OK);
}
