//! # Deployed function records

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::{FunctionError, FunctionResult};
use crate::transformer::{EntryPointStrategy, TransformedSource};

static FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]{1,50}$").expect("valid regex"));

/// Lifecycle status of a deployed function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionStatus {
    Deployed,
    Error,
}

/// One accepted function submission.
///
/// Owned by the registry. A redeploy under the same name replaces the record.
#[derive(Debug, Clone)]
pub struct DeployedFunction {
    /// Identifies this deployment; scratch artifacts are keyed by it.
    pub id: Uuid,
    pub name: String,
    pub original_source: String,
    pub wrapped_source: String,
    pub strategy: EntryPointStrategy,
    /// Advisory: stored and reported, not enforced.
    pub capability_config: Map<String, Value>,
    /// SHA-256 of the original source.
    pub code_hash: String,
    pub deployed_at: DateTime<Utc>,
    pub status: FunctionStatus,
}

impl DeployedFunction {
    pub fn new(
        name: String,
        original_source: String,
        transformed: TransformedSource,
        capability_config: Map<String, Value>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(original_source.as_bytes());
        let code_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            name,
            original_source,
            wrapped_source: transformed.wrapped,
            strategy: transformed.strategy,
            capability_config,
            code_hash,
            deployed_at: Utc::now(),
            status: FunctionStatus::Deployed,
        }
    }

    /// Length of the original source in characters.
    pub fn code_length(&self) -> usize {
        self.original_source.chars().count()
    }

    pub fn has_capability_config(&self) -> bool {
        !self.capability_config.is_empty()
    }

    pub fn summary(&self) -> FunctionSummary {
        FunctionSummary {
            name: self.name.clone(),
            deployed_at: self.deployed_at,
            status: self.status,
            has_capability_config: self.has_capability_config(),
            code_length: self.code_length(),
        }
    }

    pub fn details(&self, function_url: String) -> FunctionDetails {
        FunctionDetails {
            name: self.name.clone(),
            id: self.id,
            deployed_at: self.deployed_at,
            status: self.status,
            function_url,
            code_length: self.code_length(),
            code_hash: self.code_hash.clone(),
            entry_point: self.strategy.clone(),
            capability_config: self.capability_config.clone(),
            original_source: self.original_source.clone(),
            wrapped_source: self.wrapped_source.clone(),
        }
    }
}

/// Listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSummary {
    pub name: String,
    pub deployed_at: DateTime<Utc>,
    pub status: FunctionStatus,
    pub has_capability_config: bool,
    pub code_length: usize,
}

/// Full introspection view of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDetails {
    pub name: String,
    pub id: Uuid,
    pub deployed_at: DateTime<Utc>,
    pub status: FunctionStatus,
    pub function_url: String,
    pub code_length: usize,
    pub code_hash: String,
    pub entry_point: EntryPointStrategy,
    pub capability_config: Map<String, Value>,
    pub original_source: String,
    pub wrapped_source: String,
}

/// Check a function name: lowercase alphanumerics and hyphens, 1-50 chars.
pub fn validate_name(name: &str) -> FunctionResult<()> {
    if FUNCTION_NAME.is_match(name) {
        Ok(())
    } else if name.is_empty() {
        Err(FunctionError::Validation(
            "function name must not be empty".to_string(),
        ))
    } else {
        Err(FunctionError::Validation(format!(
            "invalid function name '{}': use 1-50 lowercase letters, digits or hyphens",
            name
        )))
    }
}

/// Check a submitted source against the size limit.
pub fn validate_source(source: &str, max_len: usize) -> FunctionResult<()> {
    if source.trim().is_empty() {
        return Err(FunctionError::Validation(
            "function code must not be empty".to_string(),
        ));
    }
    let len = source.chars().count();
    if len > max_len {
        return Err(FunctionError::Validation(format!(
            "function code is {} characters, the limit is {}",
            len, max_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::CodeTransformer;

    #[test]
    fn test_name_validation() {
        assert!(validate_name("valid-name-1").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name(&"a".repeat(50)).is_ok());

        assert!(validate_name("").is_err());
        assert!(validate_name("Has_Upper").is_err());
        assert!(validate_name("under_score").is_err());
        assert!(validate_name("with space").is_err());
        assert!(validate_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_source_validation() {
        assert!(validate_source("x", 10).is_ok());
        assert!(validate_source("   \n\t", 10).is_err());
        assert!(validate_source("", 10).is_err());
        assert!(validate_source(&"x".repeat(11), 10).is_err());
        // The limit counts characters, not bytes.
        assert!(validate_source(&"é".repeat(10), 10).is_ok());
    }

    #[test]
    fn test_record_metadata() {
        let source = "function hi() { return 'hi' }\nhi".to_string();
        let transformed = CodeTransformer::new().transform(&source);
        let mut config = Map::new();
        config.insert("lodash".into(), Value::String("npm:lodash".into()));

        let func = DeployedFunction::new("hi".into(), source.clone(), transformed, config);
        assert_eq!(func.status, FunctionStatus::Deployed);
        assert_eq!(func.code_length(), source.len());
        assert_eq!(func.code_hash.len(), 64);
        assert!(func.has_capability_config());

        let summary = func.summary();
        assert_eq!(summary.name, "hi");
        assert!(summary.has_capability_config);

        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("deployedAt").is_some());
        assert_eq!(json["status"], "deployed");
    }
}
