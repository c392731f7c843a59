//! Tool type definitions.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A tool definition as handed to the gateway, before it has an id.
///
/// Schema blobs are kept opaque; the registry only cares about the name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// JSON schema of the tool's input.
    #[serde(default)]
    pub input_schema: Option<Value>,
    /// JSON schema of the tool's output.
    #[serde(default)]
    pub output_schema: Option<Value>,
    /// Provider-specific options blob.
    #[serde(default)]
    pub provider_options: Option<Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ToolDefinition {
    /// A definition with just a name; schemas can be attached later.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_schema: None,
            output_schema: None,
            provider_options: None,
            description: None,
        }
    }
}

/// A registered tool with a stable id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    /// Stable identifier (uuid).
    pub id: String,
    /// Unique tool name.
    pub name: String,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub provider_options: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
}

impl Tool {
    /// Assign a fresh id to a definition.
    pub fn from_definition(definition: ToolDefinition) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: definition.name,
            input_schema: definition.input_schema,
            output_schema: definition.output_schema,
            provider_options: definition.provider_options,
            description: definition.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_named_definition() {
        let def = ToolDefinition::named("web_search");
        assert_eq!(def.name, "web_search");
        assert!(def.input_schema.is_none());
    }

    #[test]
    fn test_from_definition_keeps_schemas() {
        let def = ToolDefinition {
            name: "web_search".to_string(),
            input_schema: Some(json!({"type": "object"})),
            output_schema: None,
            provider_options: Some(json!({"timeout_ms": 5000})),
            description: Some("Search the web".to_string()),
        };
        let tool = Tool::from_definition(def.clone());
        assert!(!tool.id.is_empty());
        assert_eq!(tool.name, def.name);
        assert_eq!(tool.input_schema, def.input_schema);
        assert_eq!(tool.provider_options, def.provider_options);
    }
}
