//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming tool call:
//!     → rate_limit.rs (per-tenant token bucket)
//!     → auth.rs (bearer token → Principal)
//!     → auth.rs (granted scopes ⊇ required scopes)
//!     → Pass to validation
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - Tenants never share a bucket

pub mod auth;
pub mod rate_limit;

pub use auth::{
    authenticator_from_config, AuthError, Authenticator, BypassAuthenticator, Principal,
    StaticTokenAuthenticator,
};
pub use rate_limit::{RateLimited, TenantRateLimiter};
