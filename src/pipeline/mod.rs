//! Tool call pipeline.
//!
//! # Data Flow
//! ```text
//! POST /tools/{*path}
//!     → request.rs (headers + body → ToolRequest, control fields split off)
//!     → orchestrator.rs (admission, auth, validation, idempotency, policy)
//!     → handler dispatch under a deadline
//!     → ToolResponse or GatewayError
//! ```

pub mod orchestrator;
pub mod request;

pub use orchestrator::{Pipeline, PipelineSettings};
pub use request::{ToolRequest, ToolResponse};
