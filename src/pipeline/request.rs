//! Tool call requests and responses as seen by the pipeline.

use axum::http::HeaderMap;
use serde_json::Value;

use crate::cache::CacheOutcome;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";
pub const APPROVAL_HEADER: &str = "x-approval-token";
pub const CALL_ID_HEADER: &str = "x-call-id";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Body fields that steer the gateway and are never passed to handlers.
const CONTROL_FIELDS: [&str; 2] = ["idempotency_key", "approval_token"];

/// One inbound tool call.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    /// Route path, e.g. `/tools/crm/create_case`.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ToolRequest {
    pub fn new(path: impl Into<String>, headers: HeaderMap, body: Value) -> Self {
        Self {
            path: path.into(),
            headers,
            body,
        }
    }

    /// Request addressed by dotted tool name.
    pub fn for_tool(tool: &str, headers: HeaderMap, body: Value) -> Self {
        Self::new(format!("/tools/{}", tool.replace('.', "/")), headers, body)
    }

    /// Non-empty header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn body_field(&self, name: &str) -> Option<&str> {
        self.body
            .get(name)
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn tenant_id(&self, default: &str) -> String {
        self.header(TENANT_HEADER).unwrap_or(default).to_string()
    }

    /// `idempotency-key` header, else the `idempotency_key` body field.
    pub fn idempotency_key(&self) -> Option<String> {
        self.header(IDEMPOTENCY_HEADER)
            .or_else(|| self.body_field("idempotency_key"))
            .map(str::to_string)
    }

    /// `x-approval-token` header, else the `approval_token` body field.
    pub fn approval_token(&self) -> Option<String> {
        self.header(APPROVAL_HEADER)
            .or_else(|| self.body_field("approval_token"))
            .map(str::to_string)
    }

    pub fn call_id(&self) -> Option<String> {
        self.header(CALL_ID_HEADER).map(str::to_string)
    }

    pub fn request_id(&self) -> Option<String> {
        self.header(REQUEST_ID_HEADER).map(str::to_string)
    }

    /// The handler input: the body without control fields.
    pub fn into_input(self) -> Value {
        match self.body {
            Value::Object(mut fields) => {
                for field in CONTROL_FIELDS {
                    fields.remove(field);
                }
                Value::Object(fields)
            }
            other => other,
        }
    }
}

/// A completed tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub status: u16,
    pub body: Value,
    /// Answered from the idempotency store without dispatch.
    pub replayed: bool,
    /// Cache outcome for cacheable reads.
    pub cache: Option<CacheOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_header_wins_over_body() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("from-header"));
        let request = ToolRequest::for_tool(
            "crm.create_case",
            headers,
            json!({"idempotency_key": "from-body", "approval_token": "tok", "subject": "X"}),
        );

        assert_eq!(request.path, "/tools/crm/create_case");
        assert_eq!(request.idempotency_key().as_deref(), Some("from-header"));
        assert_eq!(request.approval_token().as_deref(), Some("tok"));
        assert_eq!(request.tenant_id("demo"), "demo");
        assert_eq!(request.into_input(), json!({"subject": "X"}));
    }

    #[test]
    fn test_body_fallback_and_blank_values() {
        let mut headers = HeaderMap::new();
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("  "));
        headers.insert(TENANT_HEADER, HeaderValue::from_static("acme"));
        let request = ToolRequest::for_tool("crm.add_note", headers, json!({"idempotency_key": "k9"}));

        assert_eq!(request.idempotency_key().as_deref(), Some("k9"));
        assert_eq!(request.approval_token(), None);
        assert_eq!(request.tenant_id("demo"), "acme");
    }
}
