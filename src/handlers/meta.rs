use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use crate::handlers::{HandlerError, HandlerOutput, InvocationContext, ToolHandler};

/// `meta.health`: liveness with process uptime.
#[derive(Debug, Clone, Copy)]
pub struct HealthHandler {
    started: Instant,
}

impl HealthHandler {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for HealthHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Health payload shared by `meta.health` and `GET /health`.
pub fn health_payload(started: Instant) -> Value {
    let uptime_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    json!({ "status": "ok", "uptime_ms": uptime_ms })
}

#[async_trait]
impl ToolHandler for HealthHandler {
    async fn invoke(&self, _ctx: &InvocationContext, _input: Value) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput::ok(health_payload(self.started)))
    }
}
