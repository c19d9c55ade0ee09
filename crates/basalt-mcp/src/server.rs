//! MCP server implementation.
//!
//! This module provides the main MCP server that handles tool discovery
//! and dispatches tool calls to the edge function tools.

use crate::edge::EdgeTools;
use crate::error::McpError;
use crate::http_transport::HttpServer;
use crate::protocol::*;
use crate::tools::ToolRegistry;
use basalt_core::config::mcp::{McpConfig, Transport};
use basalt_functions::FunctionService;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// Channel used by transports to hand requests to the server.
pub type RequestSender = mpsc::Sender<(JsonRpcRequest, mpsc::Sender<JsonRpcResponse>)>;

/// The MCP server.
pub struct McpServer {
    config: McpConfig,
    tools: ToolRegistry,
    edge: EdgeTools,
}

impl McpServer {
    /// Create a server exposing the edge function tools of `service`.
    pub fn new(config: McpConfig, service: Arc<FunctionService>) -> Result<Self, McpError> {
        let edge = EdgeTools::new(service);
        let mut tools = ToolRegistry::new();
        for definition in edge.definitions() {
            tools.register(definition)?;
        }

        tracing::debug!(tool_count = tools.len(), "Registered MCP tools");

        Ok(Self {
            config,
            tools,
            edge,
        })
    }

    /// Get a reference to the tool registry.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// The function service behind the edge tools.
    pub fn service(&self) -> &Arc<FunctionService> {
        self.edge.service()
    }

    /// Start the MCP server.
    pub async fn run(self: Arc<Self>) -> Result<(), McpError> {
        match self.config.transport {
            Transport::Stdio => self.run_stdio().await,
            Transport::Http => self.run_http().await,
        }
    }

    /// Run the server with stdio transport.
    ///
    /// Each request is handled on its own task, so a slow function run does
    /// not hold up other calls. Responses are written one line each as they
    /// complete.
    async fn run_stdio(self: Arc<Self>) -> Result<(), McpError> {
        tracing::info!("Starting MCP server with stdio transport");

        let (out_tx, mut out_rx) = mpsc::channel::<JsonRpcResponse>(100);

        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(response) = out_rx.recv().await {
                let mut line = serde_json::to_string(&response)?;
                line.push('\n');
                stdout.write_all(line.as_bytes()).await?;
                stdout.flush().await?;
            }
            Ok::<(), McpError>(())
        });

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: JsonRpcRequest = match serde_json::from_str(line) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "Unparseable MCP message");
                    let response =
                        JsonRpcResponse::error(None, -32700, format!("Parse error: {}", e));
                    if out_tx.send(response).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let server = self.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_message(request).await {
                    let _ = out_tx.send(response).await;
                }
            });
        }

        tracing::info!("stdin closed, stopping MCP server");
        drop(out_tx);
        writer
            .await
            .map_err(|e| McpError::TransportError(e.to_string()))??;
        Ok(())
    }

    /// Run the server with HTTP transport.
    async fn run_http(self: Arc<Self>) -> Result<(), McpError> {
        let bind_address = self.config.bind_address();
        tracing::info!(
            address = %bind_address,
            "Starting MCP server with HTTP transport"
        );

        let request_tx = self.spawn_dispatcher();
        HttpServer::new(bind_address, request_tx).run().await
    }

    /// Spawn the task that feeds transport requests into the server.
    ///
    /// Every request gets its own task. Notifications are answered by
    /// dropping the reply channel.
    pub fn spawn_dispatcher(self: Arc<Self>) -> RequestSender {
        let (request_tx, mut request_rx) =
            mpsc::channel::<(JsonRpcRequest, mpsc::Sender<JsonRpcResponse>)>(100);

        tokio::spawn(async move {
            while let Some((request, response_tx)) = request_rx.recv().await {
                let server = self.clone();
                tokio::spawn(async move {
                    if let Some(response) = server.handle_message(request).await {
                        let _ = response_tx.send(response).await;
                    }
                });
            }
        });

        request_tx
    }

    /// Handle one incoming message. Notifications produce no response.
    pub async fn handle_message(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "MCP notification");
            return None;
        }
        Some(self.handle_request(request).await)
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id),
            "initialized" | "notifications/initialized" | "ping" => {
                JsonRpcResponse::success(id, json!({}))
            }
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            "shutdown" => self.handle_shutdown(id),
            _ => JsonRpcResponse::error(
                id,
                -32601,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        let server_info = ServerInfo {
            name: "basalt-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        let result = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": server_info,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            }
        });
        JsonRpcResponse::success(id, result)
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let result = ListToolsResponse {
            tools: self.tools.list().into_iter().cloned().collect(),
        };
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
        }
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => return JsonRpcResponse::error(id, -32602, "Missing params"),
        };

        if !self.tools.contains(&params.name) {
            return JsonRpcResponse::error(id, -32602, format!("Tool not found: {}", params.name));
        }

        // Tools without parameters may be called with no arguments at all.
        let arguments = match params.arguments {
            Value::Null => json!({}),
            other => other,
        };

        if let Err(err) = self.tools.validate_arguments(&params.name, &arguments) {
            tracing::debug!(tool = %params.name, error = %err, "Rejected tool arguments");
            let data = match &err {
                McpError::InvalidArguments { reasons, .. } => Some(json!({ "errors": reasons })),
                _ => None,
            };
            return JsonRpcResponse::error_with_data(id, err.code(), err.to_string(), data);
        }

        let started = Instant::now();
        match self.edge.call(&params.name, arguments).await {
            Ok(result) => {
                tracing::info!(
                    tool = %params.name,
                    is_error = result.is_error.unwrap_or(false),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Tool call completed"
                );
                match serde_json::to_value(result) {
                    Ok(value) => JsonRpcResponse::success(id, value),
                    Err(e) => JsonRpcResponse::error(id, -32603, e.to_string()),
                }
            }
            Err(err) => {
                tracing::warn!(tool = %params.name, error = %err, "Tool call failed");
                JsonRpcResponse::error(id, err.code(), err.to_string())
            }
        }
    }

    fn handle_shutdown(&self, id: Option<Value>) -> JsonRpcResponse {
        tracing::info!("MCP server shutdown requested");
        JsonRpcResponse::success(id, json!(null))
    }
}
