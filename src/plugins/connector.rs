//! Connector contract
//!
//! Every plugin, native or loaded from disk, ends up as an
//! `Arc<dyn Connector>` owned by the host.

use crate::error::ConnectorError;
use crate::identity::CallerIdentity;
use crate::secrets::SecretsProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// A tool a connector exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique across the aggregated registry
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// JSON schema for the arguments
    #[serde(default = "empty_object_schema")]
    pub input_schema: Value,
    /// Whether calls must be suspended for human approval
    #[serde(default)]
    pub is_consequential: bool,
}

/// Parameter definition, a shorthand for simple object schemas
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name
    pub name: String,
    /// Parameter type (string, number, boolean, array, object)
    #[serde(rename = "type")]
    pub param_type: String,
    /// Description
    pub description: String,
    /// Whether parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterDef {
    pub fn required(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            param_type: param_type.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, param_type: &str, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

fn empty_object_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: empty_object_schema(),
            is_consequential: false,
        }
    }

    /// Set the argument schema
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Build the argument schema from parameter definitions
    pub fn with_parameters(mut self, parameters: &[ParameterDef]) -> Self {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for param in parameters {
            properties.insert(
                param.name.clone(),
                serde_json::json!({
                    "type": param.param_type,
                    "description": param.description,
                }),
            );
            if param.required {
                required.push(Value::String(param.name.clone()));
            }
        }
        self.input_schema = serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        });
        self
    }

    /// Mark the tool as requiring human approval
    pub fn consequential(mut self) -> Self {
        self.is_consequential = true;
        self
    }
}

/// The capability set every plugin provides.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Enumerate the tools this connector provides
    fn list_tools(&self) -> Result<Vec<ToolDefinition>, ConnectorError>;

    /// Run a tool. `identity` is specific to this one call.
    async fn execute(
        &self,
        tool_name: &str,
        arguments: Value,
        identity: Option<CallerIdentity>,
    ) -> Result<Value, ConnectorError>;
}

/// Constructor for a native connector. Takes exactly the shared secrets.
pub type ConnectorFactory = fn(Arc<dyn SecretsProvider>) -> anyhow::Result<Arc<dyn Connector>>;
