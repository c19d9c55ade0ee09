//! `basalt serve` command implementation.
//!
//! Starts the MCP server on the configured transport. Deployed functions live
//! in memory only and their scratch files are removed on shutdown.

use anyhow::{Context, Result};
use basalt_core::{BasaltConfig, Transport};
use basalt_functions::FunctionService;
use basalt_mcp::McpServer;
use clap::Args;
use std::sync::Arc;
use tracing::{info, warn};

/// Arguments for `basalt serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Transport type (stdio or http). Overrides config file.
    #[arg(long, env = "BASALT_TRANSPORT")]
    pub transport: Option<Transport>,

    /// HTTP host (only for http transport). Overrides config file.
    #[arg(long)]
    pub host: Option<String>,

    /// HTTP port (only for http transport). Overrides config file.
    #[arg(long, env = "BASALT_PORT")]
    pub port: Option<u16>,
}

impl ServeArgs {
    fn apply(&self, config: &mut BasaltConfig) {
        if let Some(transport) = self.transport {
            config.mcp.transport = transport;
        }
        if let Some(host) = &self.host {
            config.mcp.host = host.clone();
        }
        if let Some(port) = self.port {
            config.mcp.port = port;
        }
    }
}

pub async fn execute(args: ServeArgs, mut config: BasaltConfig) -> Result<()> {
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let service = Arc::new(FunctionService::with_node(config.functions.clone()));
    if !service.is_available().await {
        warn!(
            node_binary = %config.functions.node_binary,
            "No JavaScript runtime found; invocations will fail until one is installed"
        );
    }

    let server = Arc::new(
        McpServer::new(config.mcp.clone(), service.clone())
            .context("Failed to create MCP server")?,
    );

    info!(
        project = config.project.as_deref().unwrap_or("-"),
        transport = %config.mcp.transport,
        timeout_ms = config.functions.timeout_ms,
        scratch_dir = %config.functions.resolved_scratch_dir().display(),
        "Starting Basalt"
    );
    if config.mcp.is_http() {
        info!(address = %config.mcp.bind_address(), "HTTP transport selected");
    }

    let result = tokio::select! {
        result = server.run() => result.context("MCP server failed"),
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    let removed = service.shutdown().await;
    info!(removed, "Removed deployed functions");

    result
}
