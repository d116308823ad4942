//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;

use tool_gateway::config::{AdminConfig, ListenerConfig, SnapshotHandle, StoresConfig};
use tool_gateway::handlers::{HandlerSet, ToolHandler};
use tool_gateway::http::{AppState, HttpServer};
use tool_gateway::outbox::MemoryOutbox;
use tool_gateway::pipeline::{Pipeline, PipelineSettings};
use tool_gateway::policy::PolicyDocument;
use tool_gateway::security::{Principal, StaticTokenAuthenticator};
use tool_gateway::store::Stores;
use tool_gateway::tenancy::{TenantContext, TenantDirectory, TenantDocument};
use tool_gateway::tools::{ToolManifest, ToolRegistry};

pub const MANIFEST: &str = include_str!("../../config/manifest/tools.json");
pub const DEMO_POLICY: &str = include_str!("../../config/policies/demo.json");

/// Grants every CRM scope.
pub const AGENT_TOKEN: &str = "agent-token";
/// Grants `customer:read` only.
pub const READER_TOKEN: &str = "reader-token";
pub const ADMIN_KEY: &str = "admin-key";

pub struct TestGateway {
    pub router: Router,
    pub pipeline: Arc<Pipeline>,
    pub outbox: Arc<MemoryOutbox>,
}

/// In-memory gateway over the shipped manifest and demo policy.
pub struct GatewayBuilder {
    handlers: HandlerSet,
    tenant: Value,
    extra_tools: Vec<Value>,
    admin: AdminConfig,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            handlers: HandlerSet::builtin(),
            tenant: serde_json::json!({}),
            extra_tools: Vec::new(),
            admin: AdminConfig::default(),
        }
    }

    pub fn handler<H: ToolHandler + 'static>(mut self, tool: &str, handler: H) -> Self {
        self.handlers.register(tool, handler);
        self
    }

    /// Document for the `demo` tenant.
    pub fn tenant(mut self, doc: Value) -> Self {
        self.tenant = doc;
        self
    }

    pub fn tool(mut self, descriptor: Value) -> Self {
        self.extra_tools.push(descriptor);
        self
    }

    pub fn admin(mut self) -> Self {
        self.admin = AdminConfig {
            enabled: true,
            api_key: ADMIN_KEY.to_string(),
        };
        self
    }

    fn snapshots(&self) -> SnapshotHandle {
        let mut manifest: Value = serde_json::from_str(MANIFEST).unwrap();
        manifest["tools"]
            .as_array_mut()
            .unwrap()
            .extend(self.extra_tools.iter().cloned());
        let manifest = ToolManifest::from_json(&manifest.to_string()).unwrap();
        let registry = ToolRegistry::build(&manifest, &self.handlers).unwrap();

        let tenants = TenantDirectory::in_memory();
        let doc: TenantDocument = serde_json::from_value(self.tenant.clone()).unwrap();
        tenants.insert_tenant(TenantContext::from_document("demo", &doc));
        tenants.insert_tenant(TenantContext::with_defaults("acme"));
        let policy: PolicyDocument = serde_json::from_str(DEMO_POLICY).unwrap();
        tenants.insert_policy("demo", policy);

        SnapshotHandle::from_parts(registry, tenants)
    }

    pub fn build(self) -> TestGateway {
        let snapshots = Arc::new(self.snapshots());
        self.build_with(snapshots)
    }

    /// Build over an existing snapshot handle (e.g. one backed by files).
    pub fn build_with(self, snapshots: Arc<SnapshotHandle>) -> TestGateway {
        let authenticator = StaticTokenAuthenticator::new()
            .with_token(
                AGENT_TOKEN,
                Principal::new("voice-agent", ["customer:read", "case:write", "note:write"]),
            )
            .with_token(READER_TOKEN, Principal::new("reader", ["customer:read"]));

        let outbox = Arc::new(MemoryOutbox::new());
        let stores = Stores::in_memory(&StoresConfig::default()).with_outbox(outbox.clone());
        let pipeline = Arc::new(Pipeline::new(
            snapshots,
            Arc::new(authenticator),
            stores,
            PipelineSettings::default(),
        ));

        let state = AppState::new(Arc::clone(&pipeline), self.admin);
        let server = HttpServer::new(state, &ListenerConfig::default());
        TestGateway {
            router: server.router(),
            pipeline,
            outbox,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn error_type(&self) -> &str {
        self.body["error"]["type"].as_str().unwrap_or_default()
    }

    pub fn error_message(&self) -> &str {
        self.body["error"]["message"].as_str().unwrap_or_default()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    TestResponse {
        status,
        headers,
        body,
    }
}

/// `POST /tools/...` for a dotted tool name with the given headers.
pub fn tool_call(tool: &str, body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/tools/{}", tool.replace('.', "/")))
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Like [`tool_call`] with the agent token.
pub fn agent_call(tool: &str, body: &Value, headers: &[(&str, &str)]) -> Request<Body> {
    let auth = format!("Bearer {AGENT_TOKEN}");
    let mut all = vec![("authorization", auth.as_str())];
    all.extend_from_slice(headers);
    tool_call(tool, body, &all)
}
