//! Multi-tenant HTTP tool gateway library.

pub mod admin;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod http;
pub mod idempotency;
pub mod lifecycle;
pub mod observability;
pub mod outbox;
pub mod pipeline;
pub mod policy;
pub mod resilience;
pub mod security;
pub mod store;
pub mod tenancy;
pub mod tools;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Pipeline, ToolRequest, ToolResponse};
