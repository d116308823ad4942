//! The ordered admission, validation and dispatch stages of a tool call.
//!
//! ```text
//! tenant → breaker → rate limit → auth → idempotency key → scopes
//!   → input schema → idempotency replay → policy → dispatch
//!   → record (writes) → output schema
//! ```
//!
//! Every stage can short-circuit with a [`GatewayError`]. The breaker permit
//! taken at admission is settled only by the dispatch outcome. Writes hold a
//! per-key lock from the idempotency lookup until their outcome is recorded.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::Instrument;

use crate::cache::CacheOutcome;
use crate::config::{ConfigSnapshot, PipelineConfig, SnapshotHandle};
use crate::error::GatewayError;
use crate::handlers::{HandlerOutput, InvocationContext};
use crate::idempotency::{canonical_hash, request_hash, IdempotencyKey, IdempotencyRecord, SetOutcome};
use crate::observability::metrics;
use crate::outbox::OutboxEvent;
use crate::pipeline::request::{ToolRequest, ToolResponse};
use crate::policy::{evaluate, PolicyStatus};
use crate::resilience::circuit_breaker::{BreakerPermit, BreakerSnapshot, TenantCircuitBreakers};
use crate::resilience::timeouts::with_deadline;
use crate::security::auth::Authenticator;
use crate::security::rate_limit::TenantRateLimiter;
use crate::store::{bounded, unix_ms, Stores};
use crate::tenancy::{RateLimitSettings, TenantContext};
use crate::tools::RegisteredTool;

/// Tunables taken from `[pipeline]`.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_tenant: String,
    pub handler_timeout: Duration,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            default_tenant: config.default_tenant.clone(),
            handler_timeout: Duration::from_millis(config.handler_timeout_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Failure of an inline cache fill.
#[derive(Debug)]
enum FillFailure {
    /// The handler answered with a non-2xx status; passed through, never cached.
    Status(HandlerOutput),
    Error(GatewayError),
}

impl fmt::Display for FillFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillFailure::Status(output) => write!(f, "handler returned status {}", output.status),
            FillFailure::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Settle the breaker from a handler status: 5xx is a failure.
fn settle(permit: BreakerPermit, status: u16) {
    if status >= 500 {
        permit.record_failure();
    } else {
        permit.record_success();
    }
}

/// Settle the breaker from a dispatch error.
fn settle_error(permit: BreakerPermit, error: &GatewayError) {
    if error.counts_as_breaker_failure() {
        permit.record_failure();
    }
}

/// Runs tool calls through every stage against the current snapshot.
pub struct Pipeline {
    snapshots: Arc<SnapshotHandle>,
    authenticator: Arc<dyn Authenticator>,
    stores: Stores,
    limiter: TenantRateLimiter,
    breakers: Arc<TenantCircuitBreakers>,
    settings: PipelineSettings,
}

impl Pipeline {
    pub fn new(
        snapshots: Arc<SnapshotHandle>,
        authenticator: Arc<dyn Authenticator>,
        stores: Stores,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            snapshots,
            authenticator,
            stores,
            limiter: TenantRateLimiter::new(),
            breakers: Arc::new(TenantCircuitBreakers::new()),
            settings,
        }
    }

    pub fn snapshots(&self) -> &Arc<SnapshotHandle> {
        &self.snapshots
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn breaker_snapshot(&self, tenant: &str) -> Option<BreakerSnapshot> {
        self.breakers.snapshot(tenant)
    }

    pub fn available_tokens(&self, tenant: &str, settings: &RateLimitSettings) -> Option<f64> {
        self.limiter.tokens(tenant, settings)
    }

    /// Run one tool call.
    pub async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse, GatewayError> {
        let started = Instant::now();
        let snapshot = self.snapshots.current();

        let Some(tool) = snapshot.registry.by_path(&request.path) else {
            tracing::debug!(path = %request.path, "No tool registered for path");
            metrics::record_rejection(GatewayError::UnknownTool.reason());
            return Err(GatewayError::UnknownTool);
        };

        let span = tracing::info_span!(
            "tool_call",
            tool = %tool.descriptor.name,
            tenant = tracing::field::Empty,
            request_id = request.request_id().as_deref().unwrap_or("-"),
        );
        let result = self.run(&snapshot, &tool, request).instrument(span.clone()).await;

        let status = match &result {
            Ok(response) => response.status,
            Err(e) => e.status().as_u16(),
        };
        span.in_scope(|| match &result {
            Ok(response) => tracing::info!(
                status,
                replayed = response.replayed,
                cache = response.cache.map(CacheOutcome::as_str),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Tool call completed"
            ),
            Err(e) => {
                metrics::record_rejection(e.reason());
                tracing::info!(status, reason = e.reason(), error = %e, "Tool call rejected");
            }
        });
        metrics::record_request(&tool.descriptor.name, status, started);
        result
    }

    async fn run(
        &self,
        snapshot: &ConfigSnapshot,
        tool: &Arc<RegisteredTool>,
        request: ToolRequest,
    ) -> Result<ToolResponse, GatewayError> {
        let descriptor = &tool.descriptor;

        // Admission
        let tenant_id = request.tenant_id(&self.settings.default_tenant);
        tracing::Span::current().record("tenant", tenant_id.as_str());
        let tenant = snapshot
            .tenants
            .tenant(&tenant_id)
            .await
            .ok_or(GatewayError::UnknownTenant)?;
        let permit = self
            .breakers
            .admit(&tenant.id, &tenant.breaker)
            .map_err(|open| GatewayError::CircuitOpen {
                retry_after_ms: open.retry_after_ms,
            })?;
        self.limiter
            .admit(&tenant.id, &tenant.rate_limit)
            .map_err(|limited| GatewayError::RateLimited {
                retry_after_ms: limited.retry_after_ms,
            })?;

        let principal = self
            .authenticator
            .authenticate(&request.headers)
            .await
            .map_err(|e| GatewayError::Unauthenticated(e.to_string()))?;

        let idempotency_key = request.idempotency_key();
        if descriptor.is_write() && idempotency_key.is_none() {
            return Err(GatewayError::MissingIdempotencyKey);
        }

        if !principal.has_scopes(&descriptor.scopes_required) {
            tracing::debug!(subject = %principal.subject, required = ?descriptor.scopes_required, "Missing scopes");
            return Err(GatewayError::Forbidden);
        }

        let approval_token = request.approval_token();
        let ctx = InvocationContext {
            tenant: Arc::clone(&tenant),
            tool: descriptor.name.clone(),
            principal,
            call_id: request.call_id(),
            request_id: request.request_id(),
        };
        let input = request.into_input();

        let errors = tool.validate_input(&input);
        if !errors.is_empty() {
            return Err(GatewayError::InvalidInput { errors });
        }

        match idempotency_key {
            Some(key) if descriptor.is_write() => {
                self.run_write(snapshot, tool, &tenant, ctx, input, key, approval_token.is_some(), permit)
                    .await
            }
            _ => self.run_read(tool, &tenant, ctx, input, permit).await,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_write(
        &self,
        snapshot: &ConfigSnapshot,
        tool: &Arc<RegisteredTool>,
        tenant: &TenantContext,
        ctx: InvocationContext,
        input: Value,
        key: String,
        approved: bool,
        permit: BreakerPermit,
    ) -> Result<ToolResponse, GatewayError> {
        let descriptor = &tool.descriptor;
        let key = IdempotencyKey::new(&tenant.id, &descriptor.name, key);
        let hash = request_hash(&descriptor.name, &tenant.id, &input).map_err(|e| {
            tracing::error!(error = %e, "Failed to hash request");
            GatewayError::Internal
        })?;

        // Held until the outcome is recorded.
        let _held = self.stores.idempotency.lock(&key).await;
        if let Some(record) = self.stores.idempotency.get(&key).await {
            drop(permit);
            return replay(tool, &key, record, &hash);
        }

        let policy = snapshot.tenants.policy(&tenant.id).await;
        if policy.governs(descriptor.action()) {
            let decision = evaluate(&policy, descriptor.action(), &input);
            match decision.status {
                PolicyStatus::Denied => {
                    return Err(GatewayError::PolicyDenied(decision.reason.unwrap_or_default()));
                }
                PolicyStatus::NeedsApproval if !approved => {
                    return Err(GatewayError::ApprovalRequired {
                        required_steps: decision.required_steps.unwrap_or_default(),
                    });
                }
                _ => {}
            }
        }

        let output = match self.dispatch(tool, &ctx, input.clone()).await {
            Ok(output) => output,
            Err(e) => {
                settle_error(permit, &e);
                return Err(e);
            }
        };
        let existing = self
            .record_write(tenant, &descriptor.name, &key, hash.clone(), input, &output)
            .await;
        settle(permit, output.status);
        match existing {
            // Another process recorded this key first.
            Some(record) => replay(tool, &key, record, &hash),
            None => finish(tool, output, false, None),
        }
    }

    /// Persist the idempotency record and the outbox event. Both are best-effort.
    ///
    /// Returns the record already stored under `key`, if any.
    async fn record_write(
        &self,
        tenant: &TenantContext,
        tool: &str,
        key: &IdempotencyKey,
        request_hash: String,
        input: Value,
        output: &HandlerOutput,
    ) -> Option<IdempotencyRecord> {
        let created_at_ms = unix_ms();
        let record = IdempotencyRecord {
            request_hash,
            status: output.status,
            payload: output.payload.clone(),
            created_at_ms,
        };
        let existing = match self.stores.idempotency.set(key, &record).await {
            SetOutcome::Stored => None,
            SetOutcome::Existing(existing) => Some(existing),
            SetOutcome::Failed => {
                tracing::warn!(key = %key, "Idempotency record not stored");
                None
            }
        };

        let event = OutboxEvent {
            tenant: tenant.id.clone(),
            tool: tool.to_string(),
            request: input,
            result: output.payload.clone(),
            created_at_ms,
        };
        let outbox = &self.stores.outbox;
        if let Err(e) = bounded("outbox append", self.stores.call_timeout, outbox.append(&event)).await {
            tracing::warn!(error = %e, outbox = outbox.name(), "Outbox append failed");
        }
        existing
    }

    async fn run_read(
        &self,
        tool: &Arc<RegisteredTool>,
        tenant: &TenantContext,
        ctx: InvocationContext,
        input: Value,
        permit: BreakerPermit,
    ) -> Result<ToolResponse, GatewayError> {
        if !tool.descriptor.cacheable {
            return match self.dispatch(tool, &ctx, input).await {
                Ok(output) => {
                    settle(permit, output.status);
                    finish(tool, output, false, None)
                }
                Err(e) => {
                    settle_error(permit, &e);
                    Err(e)
                }
            };
        }

        let handler = Arc::clone(tool.handler().ok_or(GatewayError::NotImplemented)?);
        let cache_key = format!(
            "{}:{}",
            tool.descriptor.name,
            canonical_hash(&input).map_err(|_| GatewayError::Internal)?
        );
        let timeout = self.settings.handler_timeout;
        let fetch = move || async move {
            match with_deadline("handler", timeout, handler.invoke(&ctx, input)).await {
                Ok(Ok(output)) if is_success(output.status) => Ok(output.payload),
                Ok(Ok(output)) => Err(FillFailure::Status(output)),
                Ok(Err(e)) => Err(FillFailure::Error(GatewayError::Upstream(e.to_string()))),
                Err(_) => Err(FillFailure::Error(GatewayError::HandlerTimeout)),
            }
        };

        match self
            .stores
            .cache
            .get(&tenant.id, &cache_key, &tenant.cache, fetch)
            .await
        {
            Ok(lookup) => {
                // Cache hits never reached the handler.
                if lookup.outcome == CacheOutcome::Fetched {
                    permit.record_success();
                }
                finish(tool, HandlerOutput::ok(lookup.payload), false, Some(lookup.outcome))
            }
            Err(FillFailure::Status(output)) => {
                settle(permit, output.status);
                finish(tool, output, false, Some(CacheOutcome::Fetched))
            }
            Err(FillFailure::Error(e)) => {
                settle_error(permit, &e);
                Err(e)
            }
        }
    }

    async fn dispatch(
        &self,
        tool: &RegisteredTool,
        ctx: &InvocationContext,
        input: Value,
    ) -> Result<HandlerOutput, GatewayError> {
        let handler = tool.handler().ok_or(GatewayError::NotImplemented)?;
        match with_deadline("handler", self.settings.handler_timeout, handler.invoke(ctx, input)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Handler failed");
                Err(GatewayError::Upstream(e.to_string()))
            }
            Err(e) => {
                tracing::warn!(error = %e, "Handler timed out");
                Err(GatewayError::HandlerTimeout)
            }
        }
    }
}

/// Serve a recorded write, or reject it when the key was used for another body.
fn replay(
    tool: &RegisteredTool,
    key: &IdempotencyKey,
    record: IdempotencyRecord,
    request_hash: &str,
) -> Result<ToolResponse, GatewayError> {
    if record.request_hash != request_hash {
        return Err(GatewayError::IdempotencyConflict);
    }
    tracing::debug!(key = %key, "Replaying recorded result");
    metrics::record_replay();
    let output = HandlerOutput {
        status: record.status,
        payload: record.payload,
    };
    finish(tool, output, true, None)
}

/// Output contract check, applied to successful payloads including replays.
fn finish(
    tool: &RegisteredTool,
    output: HandlerOutput,
    replayed: bool,
    cache: Option<CacheOutcome>,
) -> Result<ToolResponse, GatewayError> {
    if is_success(output.status) {
        let errors = tool.validate_output(&output.payload);
        if !errors.is_empty() {
            tracing::error!(tool = %tool.descriptor.name, ?errors, "Handler output violates its schema");
            return Err(GatewayError::OutputContract { errors });
        }
    }
    Ok(ToolResponse {
        status: output.status,
        body: output.payload,
        replayed,
        cache,
    })
}
