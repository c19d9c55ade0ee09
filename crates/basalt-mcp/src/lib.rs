//! # basalt-mcp
//!
//! MCP (Model Context Protocol) server for Basalt edge functions.
//!
//! The server speaks JSON-RPC 2.0 over stdio or HTTP and exposes the
//! function lifecycle as tools:
//!
//! | Tool | Description |
//! |------|-------------|
//! | `edge_deploy_function` | Validate, wrap and register JavaScript source |
//! | `edge_invoke_function` | Run a deployed function with a JSON payload |
//! | `edge_list_functions` | List deployments |
//! | `edge_remove_function` | Remove a deployment and its scratch files |
//! | `edge_get_function` | Show source, wrapped source and entry point |
//!
//! Tool arguments are checked against each tool's JSON Schema before
//! dispatch. Results come back as pretty JSON text; failures set `isError`
//! and include troubleshooting hints.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use basalt_core::{FunctionsConfig, McpConfig};
//! use basalt_functions::FunctionService;
//! use basalt_mcp::McpServer;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), basalt_mcp::McpError> {
//! let service = Arc::new(FunctionService::with_node(FunctionsConfig::default()));
//! let server = Arc::new(McpServer::new(McpConfig::default(), service)?);
//! server.run().await?;
//! # Ok(())
//! # }
//! ```

pub mod edge;
pub mod error;
pub mod http_transport;
pub mod protocol;
pub mod server;
pub mod tools;

pub use edge::EdgeTools;
pub use error::McpError;
pub use http_transport::HttpServer;
pub use protocol::{
    CallToolParams, CallToolResponse, JsonRpcRequest, JsonRpcResponse, ToolAnnotations,
    ToolContent, ToolDefinition,
};
pub use server::{McpServer, RequestSender};
pub use tools::ToolRegistry;
