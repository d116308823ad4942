//! Policy subsystem.
//!
//! # Data Flow
//! ```text
//! Write tool passes validation
//!     → document.rs (tenant's policy, loaded via tenancy)
//!     → evaluator.rs (approved | needs_approval | denied)
//!     → pipeline proceeds, asks for approval (202) or rejects (403)
//! ```
//!
//! Evaluation is a pure function; loading and caching live in `tenancy`.

pub mod document;
pub mod evaluator;

pub use document::{ActionRules, FieldRule, PolicyDocument};
pub use evaluator::{evaluate, PolicyDecision, PolicyStatus};
