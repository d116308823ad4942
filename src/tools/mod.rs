//! Tool declarations and the compiled registry.
//!
//! # Data Flow
//! ```text
//! tools.json
//!     → manifest.rs (descriptors)
//!     → registry.rs (validators compiled, handlers bound)
//!     → ConfigSnapshot (swapped on reload)
//! ```

pub mod manifest;
pub mod registry;

pub use manifest::{ManifestError, SideEffect, ToolDescriptor, ToolManifest};
pub use registry::{RegisteredTool, RegistryError, SchemaViolation, ToolRegistry};
