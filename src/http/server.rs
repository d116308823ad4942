//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router for `/health`, `/tools/*` and (optionally) `/admin/*`
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Turn raw bodies into [`ToolRequest`]s and pipeline results into responses
//! - Serve until the shutdown broadcast fires

use std::io;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::config::{AdminConfig, ListenerConfig};
use crate::error::GatewayError;
use crate::handlers::meta::health_payload;
use crate::pipeline::request::CALL_ID_HEADER;
use crate::pipeline::{Pipeline, ToolRequest, ToolResponse};

/// Set on responses answered from the idempotency store.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub started: Instant,
    pub admin: AdminConfig,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, admin: AdminConfig) -> Self {
        Self {
            pipeline,
            started: Instant::now(),
            admin,
        }
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState, listener: &ListenerConfig) -> Self {
        Self {
            router: build_router(state, listener),
        }
    }

    /// The fully layered router, e.g. for in-process tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, listener: &ListenerConfig) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/tools/{*path}", post(tool_handler));
    if state.admin.enabled {
        router = router.merge(admin::admin_router(state.clone()));
    }

    router
        .with_state(state)
        .layer(DefaultBodyLimit::max(listener.max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(listener.request_timeout_secs)))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(health_payload(state.started))
}

/// An empty body is an empty object.
fn parse_body(body: &Bytes) -> Result<Value, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| GatewayError::MalformedBody(e.to_string()))
}

async fn tool_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let call_id = headers.get(CALL_ID_HEADER).cloned();

    let result = match parse_body(&body) {
        Ok(body) => {
            let request = ToolRequest::new(format!("/tools/{path}"), headers, body);
            state.pipeline.invoke(request).await
        }
        Err(e) => Err(e),
    };

    let mut response = match result {
        Ok(response) => tool_response(response),
        Err(e) => e.into_response(),
    };
    if let Some(call_id) = call_id {
        response.headers_mut().insert(CALL_ID_HEADER, call_id);
    }
    response
}

fn tool_response(response: ToolResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut http = (status, Json(response.body)).into_response();
    if response.replayed {
        http.headers_mut()
            .insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    }
    http
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), serde_json::json!({}));
        assert_eq!(parse_body(&Bytes::from_static(b" \n")).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_body(&Bytes::from_static(br#"{"a":1}"#)).unwrap(),
            serde_json::json!({"a": 1})
        );
        assert!(matches!(
            parse_body(&Bytes::from_static(b"{nope")),
            Err(GatewayError::MalformedBody(_))
        ));
    }
}
