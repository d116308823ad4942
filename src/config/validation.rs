//! Configuration validation.
//!
//! Serde handles the syntactic side; this module checks value ranges and
//! cross-field constraints and reports every problem at once.

use std::fmt;

use crate::config::schema::GatewayConfig;

/// Idempotency records may not expire sooner than this.
pub const MIN_IDEMPOTENCY_TTL_SECS: u64 = 60;

/// A single semantic configuration problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn check(errors: &mut Vec<ValidationError>, ok: bool, field: &'static str, message: &str) {
    if !ok {
        errors.push(ValidationError {
            field,
            message: message.to_string(),
        });
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check(
        &mut errors,
        !config.listener.bind_address.trim().is_empty(),
        "listener.bind_address",
        "must not be empty",
    );
    check(
        &mut errors,
        config.listener.request_timeout_secs > 0,
        "listener.request_timeout_secs",
        "must be greater than zero",
    );
    check(
        &mut errors,
        config.listener.max_body_bytes > 0,
        "listener.max_body_bytes",
        "must be greater than zero",
    );
    check(
        &mut errors,
        config.stores.store_timeout_ms > 0,
        "stores.store_timeout_ms",
        "must be greater than zero",
    );
    check(
        &mut errors,
        config.stores.connect_timeout_ms > 0,
        "stores.connect_timeout_ms",
        "must be greater than zero",
    );
    check(
        &mut errors,
        config.stores.idempotency_ttl_secs >= MIN_IDEMPOTENCY_TTL_SECS,
        "stores.idempotency_ttl_secs",
        "must be at least 60 seconds",
    );
    check(
        &mut errors,
        config.pipeline.handler_timeout_ms > 0,
        "pipeline.handler_timeout_ms",
        "must be greater than zero",
    );
    check(
        &mut errors,
        !config.pipeline.default_tenant.trim().is_empty(),
        "pipeline.default_tenant",
        "must not be empty",
    );
    check(
        &mut errors,
        !config.admin.enabled || !config.admin.api_key.trim().is_empty(),
        "admin.api_key",
        "must be set when the admin surface is enabled",
    );
    check(
        &mut errors,
        config.auth.tokens.iter().all(|grant| !grant.token.is_empty()),
        "auth.tokens",
        "tokens must not be empty strings",
    );

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
