//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout, body limit)
//!     → POST /tools/{*path} → pipeline
//!     → GET /health
//!     → /admin/* (when enabled)
//!     → JSON response or error envelope
//! ```

pub mod server;

pub use server::{build_router, AppState, HttpServer, REPLAYED_HEADER};
