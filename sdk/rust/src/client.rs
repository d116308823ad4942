use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;

/// Errors returned by [`ActionsClient`].
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error envelope.
    #[error("gateway returned {status} {kind}: {message}")]
    Gateway {
        status: u16,
        kind: String,
        message: String,
        retry_after_ms: Option<u64>,
        body: Value,
    },
}

/// A successful tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub status: u16,
    pub body: Value,
    /// Answered from the gateway's idempotency store.
    pub replayed: bool,
}

/// Per-call headers.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub idempotency_key: Option<String>,
    pub approval_token: Option<String>,
    pub call_id: Option<String>,
}

impl CallOptions {
    pub fn idempotent(key: impl Into<String>) -> Self {
        Self {
            idempotency_key: Some(key.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CreateCase {
    pub customer_id: String,
    pub subject: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_note: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AddNote {
    pub case_id: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateCase {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_queue: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EscalateCase {
    pub id: String,
    pub queue: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Typed client for the gateway's tool endpoints.
#[derive(Debug, Clone)]
pub struct ActionsClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    tenant: Option<String>,
}

impl ActionsClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            tenant: None,
        }
    }

    /// Send `Authorization: Bearer <token>` on every call.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Send `x-tenant-id` on every call.
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    fn decorate(&self, mut request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(tenant) = &self.tenant {
            request = request.header("x-tenant-id", tenant);
        }
        request
    }

    /// Call any tool by dotted name, e.g. `crm.create_case`.
    pub async fn call<B: Serialize + ?Sized>(
        &self,
        tool: &str,
        body: &B,
        options: &CallOptions,
    ) -> Result<ToolResult, SdkError> {
        let url = format!("{}/tools/{}", self.base_url, tool.replace('.', "/"));
        let mut request = self.decorate(self.client.post(url)).json(body);
        if let Some(key) = &options.idempotency_key {
            request = request.header("idempotency-key", key);
        }
        if let Some(token) = &options.approval_token {
            request = request.header("x-approval-token", token);
        }
        if let Some(call_id) = &options.call_id {
            request = request.header("x-call-id", call_id);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let replayed = response
            .headers()
            .get("idempotent-replayed")
            .is_some_and(|v| v.as_bytes() == b"true");
        let body: Value = response.json().await?;

        // 202 approval prompts carry an error envelope too.
        if let Some(error) = body.get("error").filter(|e| e.is_object()) {
            let kind = error["type"].as_str().unwrap_or_default().to_string();
            let message = error["message"].as_str().unwrap_or_default().to_string();
            let retry_after_ms = error["retry_after_ms"].as_u64();
            return Err(SdkError::Gateway {
                status,
                kind,
                message,
                retry_after_ms,
                body,
            });
        }
        Ok(ToolResult {
            status,
            body,
            replayed,
        })
    }

    pub async fn lookup_customer(&self, query: &str) -> Result<ToolResult, SdkError> {
        self.call(
            "crm.lookup_customer",
            &serde_json::json!({ "query": query }),
            &CallOptions::default(),
        )
        .await
    }

    pub async fn create_case(&self, input: &CreateCase, idempotency_key: &str) -> Result<ToolResult, SdkError> {
        self.call("crm.create_case", input, &CallOptions::idempotent(idempotency_key))
            .await
    }

    pub async fn add_note(&self, input: &AddNote, idempotency_key: &str) -> Result<ToolResult, SdkError> {
        self.call("crm.add_note", input, &CallOptions::idempotent(idempotency_key))
            .await
    }

    pub async fn update_case(&self, input: &UpdateCase, idempotency_key: &str) -> Result<ToolResult, SdkError> {
        self.call("crm.update_case", input, &CallOptions::idempotent(idempotency_key))
            .await
    }

    pub async fn escalate_case(&self, input: &EscalateCase, idempotency_key: &str) -> Result<ToolResult, SdkError> {
        self.call("crm.escalate_case", input, &CallOptions::idempotent(idempotency_key))
            .await
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<Value, SdkError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }
}
