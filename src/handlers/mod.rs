//! Tool handlers.
//!
//! A handler is the business action behind a tool. The pipeline only calls
//! a handler after admission, validation, idempotency and policy checks have
//! passed; handlers never see control fields such as `idempotency_key`.

pub mod crm;
pub mod meta;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::security::auth::Principal;
use crate::tenancy::TenantContext;

/// Per-call data passed to a handler.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub tenant: Arc<TenantContext>,
    pub tool: String,
    pub principal: Principal,
    /// Caller-supplied `x-call-id`, if any.
    pub call_id: Option<String>,
    pub request_id: Option<String>,
}

/// Status and payload produced by a handler.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub status: u16,
    pub payload: Value,
}

impl HandlerOutput {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: 200,
            payload,
        }
    }
}

/// Handler failures. Every variant counts as a provider failure.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("upstream provider failed: {0}")]
    Upstream(String),

    #[error("handler rejected input: {0}")]
    InvalidInput(String),
}

/// The business action behind a tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, ctx: &InvocationContext, input: Value) -> Result<HandlerOutput, HandlerError>;
}

/// Handlers keyed by tool name, bound to descriptors when a registry is built.
#[derive(Clone, Default)]
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The demo CRM handlers plus `meta.health`.
    pub fn builtin() -> Self {
        let mut set = Self::new();
        for action in crm::CrmAction::ALL {
            set.register(action.tool_name(), crm::CrmHandler::new(action));
        }
        set.register("meta.health", meta::HealthHandler::new());
        set
    }

    /// Register (or replace) the handler for `tool`.
    pub fn register<H>(&mut self, tool: impl Into<String>, handler: H) -> &mut Self
    where
        H: ToolHandler + 'static,
    {
        self.handlers.insert(tool.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, tool: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(tool).cloned()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("HandlerSet").field("tools", &names).finish()
    }
}
