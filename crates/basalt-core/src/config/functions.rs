//! Edge function runtime configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::ConfigError;

/// Configuration for deployed edge functions and their sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionsConfig {
    /// Wall-clock execution budget per invocation, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum accepted source length, in characters.
    #[serde(default = "default_max_source_len")]
    pub max_source_len: usize,

    /// Node.js executable used by the subprocess sandbox.
    #[serde(default = "default_node_binary")]
    pub node_binary: String,

    /// Directory holding per-deployment scratch artifacts.
    /// Defaults to `<system temp>/basalt-functions`.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// URL path prefix reported as the function URL.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Maximum bytes read back from one sandbox run.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

impl Default for FunctionsConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_source_len: default_max_source_len(),
            node_binary: default_node_binary(),
            scratch_dir: None,
            base_path: default_base_path(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl FunctionsConfig {
    /// Resolve the scratch directory, falling back to the system temp dir.
    pub fn resolved_scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("basalt-functions"))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::Config(
                "functions.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_source_len == 0 {
            return Err(ConfigError::Config(
                "functions.max_source_len must be greater than zero".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(ConfigError::Config(
                "functions.max_output_bytes must be greater than zero".to_string(),
            ));
        }
        if self.node_binary.trim().is_empty() {
            return Err(ConfigError::Config(
                "functions.node_binary must not be empty".to_string(),
            ));
        }
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::Config(format!(
                "functions.base_path must start with '/', got '{}'",
                self.base_path
            )));
        }
        Ok(())
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_source_len() -> usize {
    100_000
}

fn default_node_binary() -> String {
    "node".to_string()
}

fn default_base_path() -> String {
    "/functions/v1".to_string()
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}
