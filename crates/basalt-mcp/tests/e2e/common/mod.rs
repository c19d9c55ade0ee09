//! Shared test infrastructure for Basalt MCP end-to-end tests.
//!
//! This module provides:
//! - An MCP server backed by a real Node.js sandbox
//! - Helpers for `tools/call` round trips and assertions

use basalt_core::{FunctionsConfig, McpConfig};
use basalt_functions::FunctionService;
use basalt_mcp::McpServer;
use basalt_mcp::protocol::JsonRpcRequest;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tempfile::TempDir;

pub const TIMEOUT_MS: u64 = 2_000;

/// Result of one `tools/call`: the decoded text content and the error flag.
#[derive(Debug)]
pub struct ToolOutput {
    pub body: Value,
    pub is_error: bool,
}

pub struct TestContext {
    pub server: McpServer,
    pub scratch: TempDir,
    next_id: AtomicU64,
}

impl TestContext {
    pub async fn setup() -> Result<Self, String> {
        let scratch =
            tempfile::tempdir().map_err(|e| format!("Failed to create scratch dir: {}", e))?;
        let node_binary =
            std::env::var("BASALT_NODE_BINARY").unwrap_or_else(|_| "node".to_string());

        let functions = FunctionsConfig {
            timeout_ms: TIMEOUT_MS,
            node_binary,
            scratch_dir: Some(scratch.path().to_path_buf()),
            ..Default::default()
        };
        let service = Arc::new(FunctionService::with_node(functions));
        if !service.is_available().await {
            return Err("no Node.js runtime available".to_string());
        }

        let server = McpServer::new(McpConfig::default(), service)
            .map_err(|e| format!("Failed to create MCP server: {}", e))?;

        Ok(Self {
            server,
            scratch,
            next_id: AtomicU64::new(1),
        })
    }

    /// Send `tools/call` and decode the text content block.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolOutput {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(
            id,
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        );
        let response = self.server.handle_request(request).await;
        assert!(
            response.error.is_none(),
            "tools/call {} returned a protocol error: {:?}",
            name,
            response.error
        );

        let result = response.result.expect("tools/call result");
        let text = result["content"][0]["text"]
            .as_str()
            .expect("text content block");
        ToolOutput {
            body: serde_json::from_str(text).expect("content is JSON"),
            is_error: result["isError"].as_bool().unwrap_or(false),
        }
    }

    pub async fn deploy(&self, name: &str, code: &str) -> ToolOutput {
        self.call_tool(
            "edge_deploy_function",
            json!({"functionName": name, "functionCode": code}),
        )
        .await
    }

    pub async fn invoke(&self, name: &str, payload: Value) -> ToolOutput {
        self.call_tool(
            "edge_invoke_function",
            json!({"functionName": name, "payload": payload}),
        )
        .await
    }
}

/// Assert that a tool call succeeded
pub fn assert_success(output: &ToolOutput, msg: &str) {
    assert!(!output.is_error, "{}: {:#}", msg, output.body);
    assert_eq!(output.body["success"], true, "{}: {:#}", msg, output.body);
}

/// Assert that a tool call failed with the given error kind
pub fn assert_failure(output: &ToolOutput, kind: &str, msg: &str) {
    assert!(output.is_error, "{}: {:#}", msg, output.body);
    assert_eq!(output.body["errorKind"], kind, "{}: {:#}", msg, output.body);
    assert!(
        output.body["troubleshooting"].is_array(),
        "{}: failures carry troubleshooting hints",
        msg
    );
}
