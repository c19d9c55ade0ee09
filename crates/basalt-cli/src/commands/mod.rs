//! CLI command implementations for the Basalt MCP server.

pub mod config;
pub mod functions;
pub mod serve;
