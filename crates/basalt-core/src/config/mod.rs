//! Configuration types for the Basalt MCP server.
//!
//! All settings live in one YAML file (`basalt.yaml` by default) and are
//! combined into a single `BasaltConfig` structure.
//!
//! # Sections
//!
//! - **mcp**: transport selection and HTTP bind address
//! - **functions**: edge function sandbox limits and runtime location
//! - **observability**: log level for the tracing subscriber

pub mod functions;
pub mod mcp;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use functions::FunctionsConfig;
pub use mcp::{McpConfig, Transport};

/// Complete Basalt configuration loaded from a file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BasaltConfig {
    /// Project name.
    #[serde(default)]
    pub project: Option<String>,

    /// MCP server configuration.
    #[serde(default)]
    pub mcp: McpConfig,

    /// Edge function runtime configuration.
    #[serde(default)]
    pub functions: FunctionsConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default `tracing` filter directive, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BasaltConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        // An empty file is a valid, all-defaults configuration.
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    ///
    /// Returns the configuration and whether a file was actually read.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<(Self, bool), ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Ok((Self::from_file(path)?, true))
        } else {
            Ok((Self::default(), false))
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.functions.validate()?;
        if self.mcp.is_http() && self.mcp.host.trim().is_empty() {
            return Err(ConfigError::Config(
                "mcp.host must not be empty when transport is http".to_string(),
            ));
        }
        if self.observability.log_level.trim().is_empty() {
            return Err(ConfigError::Config(
                "observability.log_level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_yaml_is_default() {
        let config = BasaltConfig::from_yaml("").unwrap();
        assert!(config.mcp.is_stdio());
        assert_eq!(config.functions.timeout_ms, 30_000);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
project: demo
mcp:
  transport: http
  port: 8088
functions:
  timeout_ms: 5000
  node_binary: /usr/local/bin/node
"#;
        let config = BasaltConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.project.as_deref(), Some("demo"));
        assert!(config.mcp.is_http());
        assert_eq!(config.mcp.port, 8088);
        assert_eq!(config.mcp.host, "127.0.0.1");
        assert_eq!(config.functions.timeout_ms, 5000);
        assert_eq!(config.functions.node_binary, "/usr/local/bin/node");
        assert_eq!(config.functions.max_source_len, 100_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let yaml = "functions:\n  timeout_ms: 0\n";
        let config = BasaltConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Config(_))));
    }

    #[test]
    fn test_unknown_transport_is_error() {
        let yaml = "mcp:\n  transport: carrier-pigeon\n";
        assert!(matches!(
            BasaltConfig::from_yaml(yaml),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_or_default() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("basalt.yaml");
        let (config, found) = BasaltConfig::load_or_default(&missing).unwrap();
        assert!(!found);
        assert!(config.project.is_none());

        let mut file = std::fs::File::create(&missing).unwrap();
        writeln!(file, "project: from-disk").unwrap();
        let (config, found) = BasaltConfig::load_or_default(&missing).unwrap();
        assert!(found);
        assert_eq!(config.project.as_deref(), Some("from-disk"));
    }
}
