//! Request-level errors and the JSON error envelope.
//!
//! ```json
//! { "error": { "type": "RateLimited", "message": "Too Many Requests", "retry_after_ms": 20 } }
//! ```

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use crate::tools::SchemaViolation;

/// Why a tool call did not produce a handler result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid input")]
    InvalidInput { errors: Vec<SchemaViolation> },

    #[error("Malformed JSON body: {0}")]
    MalformedBody(String),

    #[error("Idempotency-Key required for writes")]
    MissingIdempotencyKey,

    #[error("Idempotency-Key reused with a different request")]
    IdempotencyConflict,

    #[error("Unknown tenant")]
    UnknownTenant,

    #[error("Unknown tool")]
    UnknownTool,

    #[error("{0}")]
    Unauthenticated(String),

    #[error("Insufficient scopes")]
    Forbidden,

    #[error("{0}")]
    PolicyDenied(String),

    #[error("Approval required")]
    ApprovalRequired { required_steps: Vec<String> },

    #[error("Too Many Requests")]
    RateLimited { retry_after_ms: u64 },

    #[error("Circuit open")]
    CircuitOpen { retry_after_ms: u64 },

    #[error("Provider failed: {0}")]
    Upstream(String),

    #[error("Provider timed out")]
    HandlerTimeout,

    #[error("Output did not match schema")]
    OutputContract { errors: Vec<SchemaViolation> },

    #[error("Tool not implemented yet")]
    NotImplemented,

    #[error("Internal error")]
    Internal,
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidInput { .. }
            | GatewayError::MalformedBody(_)
            | GatewayError::MissingIdempotencyKey
            | GatewayError::IdempotencyConflict
            | GatewayError::UnknownTenant => StatusCode::BAD_REQUEST,
            GatewayError::UnknownTool => StatusCode::NOT_FOUND,
            GatewayError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden | GatewayError::PolicyDenied(_) => StatusCode::FORBIDDEN,
            GatewayError::ApprovalRequired { .. } => StatusCode::ACCEPTED,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CircuitOpen { .. }
            | GatewayError::Upstream(_)
            | GatewayError::HandlerTimeout => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::OutputContract { .. } | GatewayError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// The envelope `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput { .. }
            | GatewayError::MalformedBody(_)
            | GatewayError::MissingIdempotencyKey
            | GatewayError::IdempotencyConflict
            | GatewayError::UnknownTenant
            | GatewayError::UnknownTool
            | GatewayError::OutputContract { .. } => "ValidationError",
            GatewayError::Unauthenticated(_)
            | GatewayError::Forbidden
            | GatewayError::PolicyDenied(_)
            | GatewayError::ApprovalRequired { .. } => "PermissionDenied",
            GatewayError::RateLimited { .. } => "RateLimited",
            GatewayError::CircuitOpen { .. }
            | GatewayError::Upstream(_)
            | GatewayError::HandlerTimeout
            | GatewayError::NotImplemented => "ProviderUnavailable",
            GatewayError::Internal => "InternalError",
        }
    }

    /// Short label used for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            GatewayError::InvalidInput { .. } | GatewayError::MalformedBody(_) => "invalid_input",
            GatewayError::MissingIdempotencyKey => "missing_idempotency_key",
            GatewayError::IdempotencyConflict => "idempotency_conflict",
            GatewayError::UnknownTenant => "unknown_tenant",
            GatewayError::UnknownTool => "unknown_tool",
            GatewayError::Unauthenticated(_) => "unauthenticated",
            GatewayError::Forbidden => "forbidden",
            GatewayError::PolicyDenied(_) => "policy_denied",
            GatewayError::ApprovalRequired { .. } => "approval_required",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::HandlerTimeout => "handler_timeout",
            GatewayError::OutputContract { .. } => "output_contract",
            GatewayError::NotImplemented => "not_implemented",
            GatewayError::Internal => "internal",
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_ms }
            | GatewayError::CircuitOpen { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }

    /// Whether this outcome of a dispatch counts against the tenant's breaker.
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(self, GatewayError::Upstream(_) | GatewayError::HandlerTimeout)
    }

    fn details(&self) -> Option<Value> {
        match self {
            GatewayError::InvalidInput { errors } | GatewayError::OutputContract { errors } => {
                Some(json!({ "errors": errors }))
            }
            GatewayError::ApprovalRequired { required_steps } => {
                Some(json!({ "required_steps": required_steps }))
            }
            _ => None,
        }
    }

    /// The JSON envelope.
    pub fn envelope(&self) -> Value {
        let mut error = Map::new();
        error.insert("type".into(), Value::from(self.kind()));
        error.insert("message".into(), Value::from(self.to_string()));
        if let Some(retry_after_ms) = self.retry_after_ms() {
            error.insert("retry_after_ms".into(), Value::from(retry_after_ms));
        }
        if let Some(details) = self.details() {
            error.insert("details".into(), details);
        }
        json!({ "error": error })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.envelope())).into_response();
        if let Some(retry_after_ms) = self.retry_after_ms() {
            let secs = retry_after_ms.div_ceil(1000).max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}
