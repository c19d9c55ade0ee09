//! Public boundary of the functions subsystem.
//!
//! [`FunctionService`] wraps a [`FunctionRegistry`] and turns every outcome
//! into a serializable result record. Nothing here returns `Err`: failures
//! come back as `success: false` with the error message and its kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use basalt_core::FunctionsConfig;

use crate::error::{ErrorKind, FunctionError};
use crate::function::{FunctionDetails, FunctionSummary};
use crate::registry::FunctionRegistry;
use crate::sandbox::{NodeSandbox, Sandbox};
use crate::transformer::EntryPointStrategy;

/// Result of a deploy request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResult {
    pub success: bool,
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<EntryPointStrategy>,
}

impl DeploymentResult {
    fn failure(function_name: &str, err: &FunctionError) -> Self {
        Self {
            success: false,
            function_name: function_name.to_string(),
            message: None,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            deployed_at: None,
            function_url: None,
            code_length: None,
            entry_point: None,
        }
    }
}

/// Result of an execute request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_functions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<String>,
}

impl ExecutionResult {
    fn failure(function_name: &str, err: FunctionError) -> Self {
        let status_code = err.status_code();
        let error = err.to_string();
        let error_kind = err.kind();
        let available_functions = match err {
            FunctionError::NotFound { available, .. } => Some(available),
            _ => None,
        };
        Self {
            success: false,
            function_name: function_name.to_string(),
            data: None,
            error: Some(error),
            error_kind: Some(error_kind),
            status_code: Some(status_code),
            execution_time_ms: None,
            headers: None,
            available_functions,
            logs: Vec::new(),
        }
    }
}

/// Deploy / execute / list / remove boundary used by the tool layer.
pub struct FunctionService {
    registry: FunctionRegistry,
}

impl FunctionService {
    pub fn new(sandbox: Arc<dyn Sandbox>, config: FunctionsConfig) -> Self {
        Self {
            registry: FunctionRegistry::new(sandbox, config),
        }
    }

    /// Service backed by the Node.js subprocess sandbox.
    pub fn with_node(config: FunctionsConfig) -> Self {
        let sandbox = Arc::new(NodeSandbox::from_config(&config));
        Self::new(sandbox, config)
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub async fn deploy(
        &self,
        function_name: &str,
        function_code: &str,
        capability_config: Map<String, Value>,
    ) -> DeploymentResult {
        match self
            .registry
            .deploy(function_name, function_code, capability_config)
            .await
        {
            Ok(function) => DeploymentResult {
                success: true,
                function_name: function.name.clone(),
                message: Some(format!(
                    "Function '{}' deployed ({} entry point)",
                    function.name,
                    function.strategy.label()
                )),
                error: None,
                error_kind: None,
                deployed_at: Some(function.deployed_at),
                function_url: Some(self.registry.function_url(&function.name)),
                code_length: Some(function.code_length()),
                entry_point: Some(function.strategy.clone()),
            },
            Err(err) => DeploymentResult::failure(function_name, &err),
        }
    }

    pub async fn execute(
        &self,
        function_name: &str,
        payload: Value,
        headers: BTreeMap<String, String>,
    ) -> ExecutionResult {
        match self.registry.execute(function_name, payload, headers).await {
            Ok(report) => {
                let execution_time_ms = report.elapsed_ms();
                let outcome = report.outcome;
                ExecutionResult {
                    success: true,
                    function_name: function_name.to_string(),
                    data: Some(outcome.data),
                    error: None,
                    error_kind: None,
                    status_code: Some(outcome.status),
                    execution_time_ms: Some(execution_time_ms),
                    headers: Some(outcome.headers),
                    available_functions: None,
                    logs: outcome.logs,
                }
            }
            Err(err) => ExecutionResult::failure(function_name, err),
        }
    }

    pub fn list(&self) -> Vec<FunctionSummary> {
        self.registry.list()
    }

    pub async fn remove(&self, function_name: &str) -> bool {
        self.registry.remove(function_name).await
    }

    pub fn details(&self, function_name: &str) -> Option<FunctionDetails> {
        self.registry.details(function_name)
    }

    pub async fn is_available(&self) -> bool {
        self.registry.sandbox().is_available().await
    }

    /// Drop every deployment and its artifacts.
    pub async fn shutdown(&self) -> usize {
        self.registry.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::{BuilderState, RawOutput};
    use crate::sandbox::scripted::ScriptedSandbox;
    use serde_json::json;

    fn service(sandbox: ScriptedSandbox) -> FunctionService {
        FunctionService::new(Arc::new(sandbox), FunctionsConfig::default())
    }

    #[tokio::test]
    async fn test_deploy_result_fields() {
        let svc = service(ScriptedSandbox::silent());
        let result = svc
            .deploy("hello", "function hello() {}\nhello", Map::new())
            .await;

        assert!(result.success);
        assert_eq!(result.function_url.as_deref(), Some("/functions/v1/hello"));
        assert_eq!(result.code_length, Some(25));
        assert!(result.deployed_at.is_some());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["functionName"], "hello");
        assert_eq!(json["entryPoint"]["kind"], "bareName");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_deploy_failure_is_a_result() {
        let svc = service(ScriptedSandbox::silent());
        let result = svc.deploy("Has_Upper", "x", Map::new()).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ValidationError));
        assert!(result.error.unwrap().contains("Has_Upper"));
        assert!(svc.list().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_reports_available_functions() {
        let svc = service(ScriptedSandbox::silent());
        svc.deploy("one", "a", Map::new()).await;
        svc.deploy("two", "b", Map::new()).await;

        let result = svc.execute("never-deployed", json!({}), BTreeMap::new()).await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("never-deployed"));
        assert_eq!(result.status_code, Some(404));
        assert_eq!(
            result.available_functions,
            Some(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[tokio::test]
    async fn test_successful_execution_result() {
        let svc = service(ScriptedSandbox::new(|_, _| {
            let mut headers = Map::new();
            headers.insert("content-type".into(), json!("application/json"));
            Ok(RawOutput {
                returned: Some(json!({"ignored": true})),
                builder: BuilderState {
                    written: true,
                    status: Some(202),
                    headers,
                    body: Some(json!({"queued": true})),
                },
                logs: vec!["[log] queued".into()],
            })
        }));
        svc.deploy("queue", "q", Map::new()).await;

        let result = svc.execute("queue", json!({}), BTreeMap::new()).await;
        assert!(result.success);
        assert_eq!(result.data, Some(json!({"queued": true})));
        assert_eq!(result.status_code, Some(202));
        assert!(result.execution_time_ms.is_some());
        assert_eq!(
            result.headers.unwrap().get("content-type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(result.logs, vec!["[log] queued".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_maps_to_504() {
        let svc = service(ScriptedSandbox::new(|_, ctx| {
            Err(FunctionError::Timeout {
                timeout_ms: ctx.timeout_ms(),
            })
        }));
        svc.deploy("slow", "s", Map::new()).await;

        let result = svc.execute("slow", json!({}), BTreeMap::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));
        assert_eq!(result.status_code, Some(504));
        assert!(result.available_functions.is_none());
    }

    #[tokio::test]
    async fn test_remove_and_details() {
        let svc = service(ScriptedSandbox::silent());
        assert!(!svc.remove("x").await);
        assert!(svc.details("x").is_none());

        svc.deploy("x", "module.exports = () => 1", Map::new()).await;
        let details = svc.details("x").unwrap();
        assert_eq!(details.function_url, "/functions/v1/x");
        assert_eq!(details.original_source, "module.exports = () => 1");

        assert!(svc.remove("x").await);
        let result = svc.execute("x", json!({}), BTreeMap::new()).await;
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    }
}
