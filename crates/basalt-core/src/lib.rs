//! # basalt-core
//!
//! Configuration types shared across all Basalt crates.
//!
//! Configuration is loaded from a single `basalt.yaml` file; every section is
//! optional and falls back to its documented default.

pub mod config;

pub use config::{
    BasaltConfig, ConfigError, FunctionsConfig, McpConfig, ObservabilityConfig, Transport,
};
