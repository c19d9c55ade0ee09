//! Offline function tooling.
//!
//! `basalt functions inspect` - Show how a source file will be wrapped.
//! `basalt functions run` - Deploy a file into a throwaway registry and run it once.

use anyhow::{Context, Result};
use basalt_core::BasaltConfig;
use basalt_functions::function::{validate_name, validate_source};
use basalt_functions::{CodeTransformer, EntryPointStrategy, FunctionService};
use clap::Subcommand;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Subcommand, Debug)]
pub enum FunctionsCommand {
    /// Show the detected entry point and the wrapped source.
    Inspect {
        /// JavaScript source file.
        file: PathBuf,
    },

    /// Run a source file once against a JSON payload.
    Run {
        /// JavaScript source file.
        file: PathBuf,

        /// Request payload as JSON.
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Request header as NAME=VALUE. May be repeated.
        #[arg(long = "header", value_parser = parse_header)]
        headers: Vec<(String, String)>,

        /// Function name. Defaults to the file stem.
        #[arg(long)]
        name: Option<String>,
    },
}

pub async fn execute(cmd: FunctionsCommand, config: BasaltConfig) -> Result<()> {
    match cmd {
        FunctionsCommand::Inspect { file } => inspect(&file, &config),
        FunctionsCommand::Run {
            file,
            payload,
            headers,
            name,
        } => run(&file, &payload, headers, name, config).await,
    }
}

fn read_source(file: &Path) -> Result<String> {
    std::fs::read_to_string(file).with_context(|| format!("Failed to read source file: {:?}", file))
}

fn inspect(file: &Path, config: &BasaltConfig) -> Result<()> {
    let source = read_source(file)?;
    validate_source(&source, config.functions.max_source_len)?;

    let transformed = CodeTransformer::new().transform(&source);

    println!("\n🔍 Entry point ({}):", transformed.strategy.label());
    match &transformed.strategy {
        EntryPointStrategy::BareName { identifier } => {
            println!("   Trailing name: {}", identifier);
        }
        EntryPointStrategy::General { hint, candidates } => {
            println!("   Exports: module.exports, then export default");
            if let Some(hint) = hint {
                println!("   Hint: {}", hint);
            }
            if candidates.is_empty() {
                println!("   Declarations: (none)");
            } else {
                println!("   Declarations: {}", candidates.join(", "));
            }
        }
    }

    println!("\n📄 Wrapped source:\n");
    println!("{}", transformed.wrapped);
    Ok(())
}

async fn run(
    file: &Path,
    payload: &str,
    headers: Vec<(String, String)>,
    name: Option<String>,
    config: BasaltConfig,
) -> Result<()> {
    let source = read_source(file)?;
    let payload: Value = serde_json::from_str(payload).context("--payload is not valid JSON")?;
    let name = match name {
        Some(name) => name,
        None => default_name(file)?,
    };
    let headers: BTreeMap<String, String> = headers.into_iter().collect();

    let service = FunctionService::with_node(config.functions);
    if !service.is_available().await {
        anyhow::bail!(
            "No JavaScript runtime found at '{}'. Install Node.js or pass --node-binary",
            service.registry().config().node_binary
        );
    }

    let deployment = service.deploy(&name, &source, Map::new()).await;
    if !deployment.success {
        anyhow::bail!(
            "Deploy failed: {}",
            deployment.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let result = service.execute(&name, payload, headers).await;
    service.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.success {
        Ok(())
    } else {
        let kind = result
            .error_kind
            .map(|k| k.to_string())
            .unwrap_or_else(|| "error".to_string());
        anyhow::bail!("Function '{}' failed ({})", name, kind)
    }
}

/// Derive a function name from the file stem: lowercased, other characters
/// mapped to hyphens.
fn default_name(file: &Path) -> Result<String> {
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Cannot derive a function name from the file name; pass --name")?;
    let name: String = stem
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .take(50)
        .collect();
    validate_name(&name).context("Cannot derive a function name from the file name; pass --name")?;
    Ok(name)
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid header '{}': expected NAME=VALUE", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{}': empty name", s));
    }
    Ok((name.to_string(), value.to_string()))
}
