//! Tool registry for MCP tools.
//!
//! Stores tool definitions together with a compiled validator for each
//! tool's input schema, so arguments are checked before dispatch.

use crate::error::McpError;
use crate::protocol::ToolDefinition;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::BTreeMap;

struct RegisteredTool {
    definition: ToolDefinition,
    validator: Validator,
}

/// Registry of available MCP tools, ordered by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its input schema.
    pub fn register(&mut self, tool: ToolDefinition) -> Result<(), McpError> {
        let validator =
            jsonschema::validator_for(&tool.input_schema).map_err(|e| McpError::InvalidSchema {
                tool: tool.name.clone(),
                reason: e.to_string(),
            })?;
        self.tools.insert(
            tool.name.clone(),
            RegisteredTool {
                definition: tool,
                validator,
            },
        );
        Ok(())
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    /// Check if a tool exists.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all tools.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }

    /// Get the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Check `arguments` against the tool's input schema.
    pub fn validate_arguments(&self, name: &str, arguments: &Value) -> Result<(), McpError> {
        let tool = self.tools.get(name).ok_or_else(|| McpError::ToolNotFound {
            name: name.to_string(),
        })?;

        let reasons: Vec<String> = tool
            .validator
            .iter_errors(arguments)
            .map(|error| {
                let path = error.instance_path().to_string();
                if path.is_empty() {
                    error.to_string()
                } else {
                    format!("{}: {}", path, error)
                }
            })
            .collect();

        if reasons.is_empty() {
            Ok(())
        } else {
            Err(McpError::InvalidArguments {
                tool: name.to_string(),
                reasons,
            })
        }
    }
}
