//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request admission:
//!     → circuit_breaker.rs (fail fast while the tenant's breaker is open)
//! Handler dispatch / store call:
//!     → timeouts.rs (enforce deadline)
//!     → circuit_breaker.rs (permit settled with success/failure)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Breaker state is per tenant and per process

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitOpen, TenantCircuitBreakers};
pub use timeouts::{with_deadline, DeadlineExceeded};
