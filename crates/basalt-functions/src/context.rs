//! Per-invocation execution context.
//!
//! A fresh `ExecutionContext` is built for every `execute` call and discarded
//! once the run completes or times out. The request view is built here; the
//! response builder and the capability set live inside the sandbox and are
//! reported back through [`crate::normalizer::RawOutput`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Request as seen by the function's entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestView {
    pub method: String,
    pub path: String,
    /// Header names are lower-cased.
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub query: BTreeMap<String, String>,
}

impl RequestView {
    /// Build the request view for an invocation of `path`.
    pub fn new(path: impl Into<String>, payload: Value, headers: BTreeMap<String, String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.into(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body: payload,
            query: BTreeMap::new(),
        }
    }
}

/// Everything a sandbox needs for one run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub invocation_id: Uuid,
    pub function_name: String,
    pub request: RequestView,
    pub timeout: Duration,
}

impl ExecutionContext {
    pub fn new(function_name: impl Into<String>, request: RequestView, timeout: Duration) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            function_name: function_name.into(),
            request,
            timeout,
        }
    }

    /// Timeout in whole milliseconds, as handed to the harness.
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }
}
