//! Tool manifest (`{ "tools": [...] }`).

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Whether a tool only reads or mutates the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SideEffect {
    Read,
    Write,
}

/// One declared tool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolDescriptor {
    /// Dotted name, e.g. `crm.create_case`.
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "permissive_schema")]
    pub input_schema: Value,
    #[serde(default = "permissive_schema")]
    pub output_schema: Value,
    #[serde(rename = "side_effects")]
    pub side_effect: SideEffect,
    #[serde(default)]
    pub scopes_required: Vec<String>,
    /// Serve reads through the stale-while-revalidate cache.
    #[serde(default)]
    pub cacheable: bool,
}

fn permissive_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolDescriptor {
    /// HTTP path of the tool: `crm.create_case` → `/tools/crm/create_case`.
    pub fn route_path(&self) -> String {
        format!("/tools/{}", self.name.replace('.', "/"))
    }

    /// Last dotted segment of the name, used as the policy action.
    pub fn action(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn is_write(&self) -> bool {
        self.side_effect == SideEffect::Write
    }
}

/// The full manifest.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ToolManifest {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Errors raised while reading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ToolManifest {
    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
