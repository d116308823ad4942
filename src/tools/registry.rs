//! Startup-built tool registry.
//!
//! Every descriptor is compiled once: input and output validators plus the
//! handler (if one is registered under the tool's name). Requests look tools
//! up by route path, so routing does not have to be rebuilt on reload.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::handlers::{HandlerSet, ToolHandler};
use crate::tools::manifest::{ToolDescriptor, ToolManifest};

/// A single schema violation reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaViolation {
    pub instance_path: String,
    pub message: String,
}

/// Errors raised while compiling a manifest.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {tool}: invalid {which} schema: {message}")]
    InvalidSchema {
        tool: String,
        which: &'static str,
        message: String,
    },

    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),
}

/// A compiled tool.
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    input: jsonschema::Validator,
    output: jsonschema::Validator,
    handler: Option<Arc<dyn ToolHandler>>,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("name", &self.descriptor.name)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

fn violations(validator: &jsonschema::Validator, instance: &Value) -> Vec<SchemaViolation> {
    validator
        .iter_errors(instance)
        .map(|e| SchemaViolation {
            instance_path: e.instance_path().to_string(),
            message: e.to_string(),
        })
        .collect()
}

fn compile(tool: &str, which: &'static str, schema: &Value) -> Result<jsonschema::Validator, RegistryError> {
    jsonschema::validator_for(schema).map_err(|e| RegistryError::InvalidSchema {
        tool: tool.to_string(),
        which,
        message: e.to_string(),
    })
}

impl RegisteredTool {
    pub fn new(
        descriptor: ToolDescriptor,
        handler: Option<Arc<dyn ToolHandler>>,
    ) -> Result<Self, RegistryError> {
        let input = compile(&descriptor.name, "input", &descriptor.input_schema)?;
        let output = compile(&descriptor.name, "output", &descriptor.output_schema)?;
        Ok(Self {
            descriptor,
            input,
            output,
            handler,
        })
    }

    /// Violations of the input schema; empty when valid.
    pub fn validate_input(&self, input: &Value) -> Vec<SchemaViolation> {
        violations(&self.input, input)
    }

    /// Violations of the output schema; empty when valid.
    pub fn validate_output(&self, output: &Value) -> Vec<SchemaViolation> {
        violations(&self.output, output)
    }

    pub fn handler(&self) -> Option<&Arc<dyn ToolHandler>> {
        self.handler.as_ref()
    }
}

/// Name- and path-indexed compiled tools.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    by_name: HashMap<String, Arc<RegisteredTool>>,
    by_path: HashMap<String, Arc<RegisteredTool>>,
}

impl ToolRegistry {
    /// Compile `manifest`, binding handlers from `handlers` by tool name.
    pub fn build(manifest: &ToolManifest, handlers: &HandlerSet) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for descriptor in &manifest.tools {
            if registry.by_name.contains_key(&descriptor.name) {
                return Err(RegistryError::DuplicateTool(descriptor.name.clone()));
            }
            let handler = handlers.get(&descriptor.name);
            if handler.is_none() {
                tracing::warn!(tool = %descriptor.name, "No handler registered; calls will return 501");
            }
            let tool = Arc::new(RegisteredTool::new(descriptor.clone(), handler)?);
            registry
                .by_path
                .insert(descriptor.route_path(), Arc::clone(&tool));
            registry.by_name.insert(descriptor.name.clone(), tool);
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<RegisteredTool>> {
        self.by_name.get(name).cloned()
    }

    /// Look a tool up by its `/tools/...` path.
    pub fn by_path(&self, path: &str) -> Option<Arc<RegisteredTool>> {
        self.by_path.get(path.trim_end_matches('/')).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Tool names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> ToolManifest {
        serde_json::from_value(json!({
            "tools": [{
                "name": "crm.create_case",
                "side_effects": "write",
                "input_schema": {
                    "type": "object",
                    "required": ["customer_id", "subject"],
                    "properties": {
                        "customer_id": {"type": "string"},
                        "subject": {"type": "string"}
                    }
                }
            }, {
                "name": "crm.unbound",
                "side_effects": "read"
            }]
        }))
        .unwrap()
    }

    #[test]
    fn test_build_binds_handlers_and_paths() {
        let registry = ToolRegistry::build(&manifest(), &HandlerSet::builtin()).unwrap();
        assert_eq!(registry.len(), 2);

        let tool = registry.by_path("/tools/crm/create_case").unwrap();
        assert_eq!(tool.descriptor.name, "crm.create_case");
        assert!(tool.handler().is_some());
        assert!(registry.get("crm.unbound").unwrap().handler().is_none());
        assert!(registry.by_path("/tools/crm/nope").is_none());
    }

    #[test]
    fn test_input_violations() {
        let registry = ToolRegistry::build(&manifest(), &HandlerSet::new()).unwrap();
        let tool = registry.get("crm.create_case").unwrap();

        assert!(tool.validate_input(&json!({"customer_id": "c", "subject": "s"})).is_empty());

        let errors = tool.validate_input(&json!({"customer_id": 7}));
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.instance_path == "/customer_id"));
    }

    #[test]
    fn test_invalid_schema_fails_build() {
        let manifest: ToolManifest = serde_json::from_value(json!({
            "tools": [{"name": "bad", "side_effects": "read", "input_schema": {"type": 12}}]
        }))
        .unwrap();
        let err = ToolRegistry::build(&manifest, &HandlerSet::new()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { which: "input", .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let manifest: ToolManifest = serde_json::from_value(json!({
            "tools": [
                {"name": "meta.health", "side_effects": "read"},
                {"name": "meta.health", "side_effects": "read"}
            ]
        }))
        .unwrap();
        assert!(matches!(
            ToolRegistry::build(&manifest, &HandlerSet::new()),
            Err(RegistryError::DuplicateTool(_))
        ));
    }
}
