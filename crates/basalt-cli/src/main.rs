use anyhow::{Context, Result};
use basalt_core::BasaltConfig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::config::ConfigCommand;
use commands::functions::FunctionsCommand;
use commands::serve::ServeArgs;

#[derive(Parser, Debug)]
#[command(name = "basalt", version, about = "Basalt edge functions MCP server")]
struct Cli {
    /// Configuration file path.
    #[arg(
        short,
        long,
        global = true,
        env = "BASALT_CONFIG",
        default_value = "basalt.yaml"
    )]
    config: PathBuf,

    /// JavaScript runtime used to run functions. Overrides the config file.
    #[arg(long, global = true, env = "BASALT_NODE_BINARY")]
    node_binary: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the MCP server.
    Serve(ServeArgs),

    /// Work with function sources offline.
    Functions {
        #[command(subcommand)]
        cmd: FunctionsCommand,
    },

    /// Configuration utilities.
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, found) = BasaltConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    if let Some(node_binary) = cli.node_binary {
        config.functions.node_binary = node_binary;
    }

    init_tracing(&config.observability.log_level);

    if found {
        tracing::debug!(config = %cli.config.display(), "Loaded configuration");
    } else {
        tracing::debug!(config = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.cmd {
        Command::Serve(args) => commands::serve::execute(args, config).await,
        Command::Functions { cmd } => commands::functions::execute(cmd, config).await,
        Command::Config { cmd } => commands::config::execute(cmd, &cli.config, config, found),
    }
}

/// Logs go to stderr; stdout carries the stdio MCP transport.
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
