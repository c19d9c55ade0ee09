//! `basalt config` commands.

use anyhow::{Context, Result};
use basalt_core::BasaltConfig;
use clap::Subcommand;
use std::path::Path;

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate the configuration and print the effective settings.
    Check,
}

pub fn execute(cmd: ConfigCommand, path: &Path, config: BasaltConfig, found: bool) -> Result<()> {
    match cmd {
        ConfigCommand::Check => check(path, &config, found),
    }
}

fn check(path: &Path, config: &BasaltConfig, found: bool) -> Result<()> {
    println!("{}", summary(path, config, found));

    config
        .validate()
        .with_context(|| format!("Configuration in {:?} is invalid", path))?;

    println!("✅ Configuration is valid\n");
    println!("{}", render(config)?);
    Ok(())
}

fn summary(path: &Path, config: &BasaltConfig, found: bool) -> String {
    let mut out = if found {
        format!("📁 Config file: {}", path.display())
    } else {
        format!("📁 Config file: {} (not found, using defaults)", path.display())
    };
    if let Some(project) = &config.project {
        out.push_str(&format!("\n📦 Project: {}", project));
    }
    out
}

fn render(config: &BasaltConfig) -> Result<String> {
    let mut effective = config.clone();
    if effective.functions.scratch_dir.is_none() {
        effective.functions.scratch_dir = Some(config.functions.resolved_scratch_dir());
    }
    serde_yaml::to_string(&effective).context("Failed to render configuration")
}
