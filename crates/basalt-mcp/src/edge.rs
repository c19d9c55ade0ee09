//! The `edge_*` tool group.
//!
//! Maps MCP tool calls onto [`FunctionService`]:
//!
//! | Tool | Service call |
//! |------|--------------|
//! | `edge_deploy_function` | `deploy(functionName, functionCode, capabilityConfig)` |
//! | `edge_invoke_function` | `execute(functionName, payload, headers)` |
//! | `edge_list_functions` | `list()` |
//! | `edge_remove_function` | `remove(functionName)` |
//! | `edge_get_function` | `details(functionName)` |
//!
//! Results are returned as pretty JSON text. Failed calls set `isError` and
//! carry a `troubleshooting` list chosen by error kind.

use basalt_functions::{ErrorKind, FunctionService};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::McpError;
use crate::protocol::{CallToolResponse, ToolAnnotations, ToolDefinition};

pub const DEPLOY_TOOL: &str = "edge_deploy_function";
pub const INVOKE_TOOL: &str = "edge_invoke_function";
pub const LIST_TOOL: &str = "edge_list_functions";
pub const REMOVE_TOOL: &str = "edge_remove_function";
pub const GET_TOOL: &str = "edge_get_function";

const FUNCTION_NAME_PATTERN: &str = "^[a-z0-9-]{1,50}$";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployArgs {
    function_name: String,
    function_code: String,
    #[serde(default)]
    capability_config: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeArgs {
    function_name: String,
    #[serde(default = "empty_object")]
    payload: Value,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NameArgs {
    function_name: String,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Edge function tools backed by a [`FunctionService`].
#[derive(Clone)]
pub struct EdgeTools {
    service: Arc<FunctionService>,
}

impl EdgeTools {
    pub fn new(service: Arc<FunctionService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &Arc<FunctionService> {
        &self.service
    }

    /// Definitions of every tool in the group.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let config = self.service.registry().config();
        let function_name = json!({
            "type": "string",
            "pattern": FUNCTION_NAME_PATTERN,
            "description": "Function name: 1-50 lowercase letters, digits or hyphens"
        });

        vec![
            ToolDefinition {
                name: DEPLOY_TOOL.to_string(),
                description: Some(format!(
                    "Deploy a JavaScript edge function. The entry point is the bare function \
                     name on the last line, a default/module export, or the first callable \
                     top-level declaration. Replaces any function with the same name. \
                     Source is limited to {} characters.",
                    config.max_source_len
                )),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "functionName": function_name,
                        "functionCode": {
                            "type": "string",
                            "minLength": 1,
                            "description": "JavaScript source of the function"
                        },
                        "capabilityConfig": {
                            "type": "object",
                            "description": "Named dependencies the function expects (advisory)"
                        }
                    },
                    "required": ["functionName", "functionCode"],
                    "additionalProperties": false
                }),
                annotations: Some(ToolAnnotations::mutating(false, true)),
            },
            ToolDefinition {
                name: INVOKE_TOOL.to_string(),
                description: Some(format!(
                    "Invoke a deployed edge function with a JSON payload. Runs are limited to \
                     {}ms and may only require crypto, util, url and querystring.",
                    config.timeout_ms
                )),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "functionName": function_name,
                        "payload": {
                            "description": "Request body handed to the function"
                        },
                        "headers": {
                            "type": "object",
                            "additionalProperties": {"type": "string"},
                            "description": "Request headers"
                        }
                    },
                    "required": ["functionName"],
                    "additionalProperties": false
                }),
                annotations: Some(ToolAnnotations::mutating(false, false)),
            },
            ToolDefinition {
                name: LIST_TOOL.to_string(),
                description: Some("List deployed edge functions".to_string()),
                input_schema: json!({
                    "type": "object",
                    "properties": {},
                    "additionalProperties": false
                }),
                annotations: Some(ToolAnnotations::read_only()),
            },
            ToolDefinition {
                name: REMOVE_TOOL.to_string(),
                description: Some(
                    "Remove a deployed edge function and its scratch files".to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {"functionName": function_name},
                    "required": ["functionName"],
                    "additionalProperties": false
                }),
                annotations: Some(ToolAnnotations::mutating(true, true)),
            },
            ToolDefinition {
                name: GET_TOOL.to_string(),
                description: Some(
                    "Show a deployed edge function: source, wrapped source, entry point, \
                     code hash and URL"
                        .to_string(),
                ),
                input_schema: json!({
                    "type": "object",
                    "properties": {"functionName": function_name},
                    "required": ["functionName"],
                    "additionalProperties": false
                }),
                annotations: Some(ToolAnnotations::read_only()),
            },
        ]
    }

    /// Run one tool. Arguments must already satisfy the tool's schema.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<CallToolResponse, McpError> {
        match name {
            DEPLOY_TOOL => {
                let args: DeployArgs = parse_args(name, arguments)?;
                let result = self
                    .service
                    .deploy(&args.function_name, &args.function_code, args.capability_config)
                    .await;
                Ok(self.respond(serde_json::to_value(&result)?, result.error_kind))
            }
            INVOKE_TOOL => {
                let args: InvokeArgs = parse_args(name, arguments)?;
                let result = self
                    .service
                    .execute(&args.function_name, args.payload, args.headers)
                    .await;
                Ok(self.respond(serde_json::to_value(&result)?, result.error_kind))
            }
            LIST_TOOL => {
                let functions = self.service.list();
                let value = json!({
                    "success": true,
                    "count": functions.len(),
                    "functions": functions,
                });
                Ok(CallToolResponse::json(&value, false))
            }
            REMOVE_TOOL => {
                let args: NameArgs = parse_args(name, arguments)?;
                let removed = self.service.remove(&args.function_name).await;
                let value = if removed {
                    json!({
                        "success": true,
                        "functionName": args.function_name,
                        "message": format!("Function '{}' removed", args.function_name),
                    })
                } else {
                    self.not_found(&args.function_name)
                };
                Ok(self.respond(value, (!removed).then_some(ErrorKind::NotFound)))
            }
            GET_TOOL => {
                let args: NameArgs = parse_args(name, arguments)?;
                match self.service.details(&args.function_name) {
                    Some(details) => {
                        let value = json!({"success": true, "function": details});
                        Ok(CallToolResponse::json(&value, false))
                    }
                    None => {
                        let value = self.not_found(&args.function_name);
                        Ok(self.respond(value, Some(ErrorKind::NotFound)))
                    }
                }
            }
            other => Err(McpError::ToolNotFound {
                name: other.to_string(),
            }),
        }
    }

    fn not_found(&self, function_name: &str) -> Value {
        let available: Vec<String> = self
            .service
            .list()
            .into_iter()
            .map(|f| f.name)
            .collect();
        json!({
            "success": false,
            "functionName": function_name,
            "error": format!("function '{}' not found", function_name),
            "errorKind": ErrorKind::NotFound,
            "availableFunctions": available,
        })
    }

    /// Wrap a result value, attaching troubleshooting hints on failure.
    fn respond(&self, mut value: Value, error_kind: Option<ErrorKind>) -> CallToolResponse {
        let Some(kind) = error_kind else {
            return CallToolResponse::json(&value, false);
        };
        if let Value::Object(map) = &mut value {
            map.insert("troubleshooting".to_string(), json!(self.troubleshooting(kind)));
        }
        CallToolResponse::json(&value, true)
    }

    fn troubleshooting(&self, kind: ErrorKind) -> Vec<String> {
        let config = self.service.registry().config();
        let hints: Vec<String> = match kind {
            ErrorKind::ValidationError => vec![
                "Function names must be 1-50 characters of lowercase letters, digits or hyphens"
                    .to_string(),
                format!(
                    "Function code must be non-empty and at most {} characters",
                    config.max_source_len
                ),
            ],
            ErrorKind::NotFound => vec![
                format!("Call {} to see which functions are deployed", LIST_TOOL),
                "Functions live in memory only; redeploy them after a server restart".to_string(),
            ],
            ErrorKind::EntryPointNotCallable => vec![
                "The last line names the entry point; make sure it is a function declared above"
                    .to_string(),
                "Remove the trailing name to let Basalt look for exports instead".to_string(),
            ],
            ErrorKind::NoEntryPointFound => vec![
                "Export the handler: module.exports = async (req, res) => { ... }".to_string(),
                "Or end the source with the bare name of the function to call".to_string(),
            ],
            ErrorKind::ModuleNotAllowed => vec![
                "Only crypto, util, url and querystring can be required".to_string(),
                "Filesystem, network and process modules are not available to edge functions"
                    .to_string(),
            ],
            ErrorKind::Timeout => vec![
                format!("Runs are stopped after {}ms", config.timeout_ms),
                "Make sure every promise settles and avoid long synchronous loops".to_string(),
            ],
            ErrorKind::RuntimeFault => vec![
                "The function threw; check the error message and any logs it printed"
                    .to_string(),
                "Reproduce locally with `basalt functions run <file> --payload <json>`"
                    .to_string(),
            ],
            ErrorKind::Unavailable => vec![
                format!(
                    "No JavaScript runtime found at '{}'; install Node.js or set \
                     functions.node_binary (BASALT_NODE_BINARY)",
                    config.node_binary
                ),
            ],
            ErrorKind::Internal => vec!["Check the server logs for details".to_string()],
        };
        hints
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, McpError> {
    serde_json::from_value(arguments).map_err(|e| McpError::InvalidArguments {
        tool: tool.to_string(),
        reasons: vec![e.to_string()],
    })
}
