//! Tenant resolution.
//!
//! # Data Flow
//! ```text
//! x-tenant-id header (or pipeline.default_tenant)
//!     → directory.rs (lazy JSON load, cached per config snapshot)
//!     → context.rs (defaults applied)
//!     → TenantContext shared via Arc with limiter, breaker and cache
//! ```

pub mod context;
pub mod directory;

pub use context::{
    BreakerSettings, CacheSettings, RateLimitSettings, TenantContext, TenantDocument,
};
pub use directory::{is_valid_tenant_id, TenantDirectory};
