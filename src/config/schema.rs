//! Configuration schema definitions.
//!
//! This module defines the process-level configuration for the gateway.
//! All types derive Serde traits for deserialization from a TOML file, and
//! every section carries defaults so a minimal (or missing) file still boots.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for the tool gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request limits).
    pub listener: ListenerConfig,

    /// Locations of the tool manifest and per-tenant documents.
    pub paths: PathsConfig,

    /// Idempotency/cache/outbox backend configuration.
    pub stores: StoresConfig,

    /// Invocation pipeline knobs.
    pub pipeline: PipelineConfig,

    /// Caller authentication.
    pub auth: AuthConfig,

    /// Admin surface.
    pub admin: AdminConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:3030").
    pub bind_address: String,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub max_body_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3030".to_string(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
        }
    }
}

/// Filesystem locations of collaborator documents.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Tool manifest (`{"tools": [...]}`).
    pub manifest: PathBuf,

    /// Directory holding `<tenant>.json` configuration documents.
    pub tenants_dir: PathBuf,

    /// Directory holding `<tenant>.json` policy documents.
    pub policies_dir: PathBuf,

    /// Watch the manifest and document directories and hot-reload on change.
    pub watch: bool,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("config/manifest/tools.json"),
            tenants_dir: PathBuf::from("config/tenants"),
            policies_dir: PathBuf::from("config/policies"),
            watch: true,
        }
    }
}

/// Backend store configuration.
///
/// Backends are ranked by durability: Postgres, then Redis, then the
/// in-process tier which is always available.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoresConfig {
    /// Postgres connection string for the durable tier.
    pub database_url: Option<String>,

    /// Redis connection string for the shared tier.
    pub redis_url: Option<String>,

    /// Startup connection timeout in milliseconds.
    pub connect_timeout_ms: u64,

    /// Per-operation timeout for every store call in milliseconds.
    pub store_timeout_ms: u64,

    /// Idempotency record lifetime in seconds.
    pub idempotency_ttl_secs: u64,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            connect_timeout_ms: 2_000,
            store_timeout_ms: 500,
            idempotency_ttl_secs: 7 * 24 * 3600,
        }
    }
}

/// Invocation pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Deadline for a single handler dispatch in milliseconds.
    pub handler_timeout_ms: u64,

    /// Tenant used when the request carries no `x-tenant-id`.
    pub default_tenant: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handler_timeout_ms: 10_000,
            default_tenant: "demo".to_string(),
        }
    }
}

/// Caller authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accept every caller with `bypass_scopes` (local development only).
    pub bypass: bool,

    /// Scopes granted in bypass mode.
    pub bypass_scopes: Vec<String>,

    /// Static bearer tokens.
    pub tokens: Vec<TokenGrant>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bypass: false,
            bypass_scopes: vec![
                "customer:read".to_string(),
                "case:write".to_string(),
                "note:write".to_string(),
            ],
            tokens: Vec::new(),
        }
    }
}

/// A static bearer token and what it grants.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenGrant {
    /// The bearer token value.
    pub token: String,

    /// Subject reported for the caller.
    #[serde(default)]
    pub subject: String,

    /// Granted capability scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Admin surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
