//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! gateway.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!
//! manifest + tenant/policy documents
//!     → snapshot.rs (registry compiled, tenant directory created)
//!     → shared via ArcSwap to every request
//!
//! On change:
//!     watcher.rs detects change (or POST /admin/reload)
//!     → snapshot.rs rebuilds
//!     → atomic swap of Arc<ConfigSnapshot>
//!     → new requests observe the new snapshot
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable once built; changes require a full rebuild
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod snapshot;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, AuthConfig, GatewayConfig, ListenerConfig, LogFormat, ObservabilityConfig,
    PathsConfig, PipelineConfig, StoresConfig, TokenGrant,
};
pub use snapshot::{ConfigSnapshot, SnapshotError, SnapshotHandle};
pub use watcher::{run_reload_loop, ConfigWatcher};
