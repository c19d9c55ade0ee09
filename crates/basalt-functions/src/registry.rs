//! # Function Registry
//!
//! In-memory store of deployed functions and the owner of their lifecycle:
//! `deploy` validates, transforms and stages a submission, `execute` runs it
//! through the sandbox and normalizes the result, `remove` drops it and its
//! scratch artifacts.
//!
//! The map lock is only held for lookups and inserts, never across a sandbox
//! call, so a slow run does not block deploys, listings or other runs.
//! Nothing survives a process restart.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use basalt_core::FunctionsConfig;

use crate::context::{ExecutionContext, RequestView};
use crate::error::{ErrorKind, FunctionError, FunctionResult};
use crate::function::{
    validate_name, validate_source, DeployedFunction, FunctionDetails, FunctionStatus,
    FunctionSummary,
};
use crate::normalizer::{normalize, ExecutionOutcome, ResultShape};
use crate::sandbox::Sandbox;
use crate::transformer::CodeTransformer;

/// A completed run.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub shape: ResultShape,
    pub elapsed: Duration,
}

impl ExecutionReport {
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Registry of deployed functions.
pub struct FunctionRegistry {
    functions: RwLock<BTreeMap<String, Arc<DeployedFunction>>>,
    sandbox: Arc<dyn Sandbox>,
    transformer: CodeTransformer,
    config: FunctionsConfig,
}

impl FunctionRegistry {
    /// Create an empty registry backed by `sandbox`.
    pub fn new(sandbox: Arc<dyn Sandbox>, config: FunctionsConfig) -> Self {
        Self {
            functions: RwLock::new(BTreeMap::new()),
            sandbox,
            transformer: CodeTransformer::new(),
            config,
        }
    }

    pub fn config(&self) -> &FunctionsConfig {
        &self.config
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// URL-like path a function is served under.
    pub fn function_url(&self, name: &str) -> String {
        format!("{}/{}", self.config.base_path.trim_end_matches('/'), name)
    }

    // The map is only touched by single inserts and removes, so a poisoned
    // lock still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<DeployedFunction>>> {
        self.functions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<DeployedFunction>>> {
        self.functions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate, transform, stage and store a function.
    ///
    /// Replaces any function already deployed under `name`. A rejected
    /// submission leaves the registry untouched.
    #[instrument(skip(self, source, capability_config), fields(function = %name))]
    pub async fn deploy(
        &self,
        name: &str,
        source: &str,
        capability_config: Map<String, Value>,
    ) -> FunctionResult<Arc<DeployedFunction>> {
        validate_name(name)?;
        validate_source(source, self.config.max_source_len)?;

        let transformed = self.transformer.transform(source);
        let function = Arc::new(DeployedFunction::new(
            name.to_string(),
            source.to_string(),
            transformed,
            capability_config,
        ));

        if let Err(err) = self.sandbox.install(&function).await {
            warn!(error = %err, "Failed to stage function");
            if let Err(cleanup) = self.sandbox.release(&function).await {
                debug!(error = %cleanup, "Cleanup after failed staging also failed");
            }
            return Err(err.into());
        }

        let previous = self
            .write()
            .insert(name.to_string(), Arc::clone(&function));

        if let Some(previous) = previous {
            debug!(previous = %previous.id, "Replacing earlier deployment");
            if let Err(err) = self.sandbox.release(&previous).await {
                warn!(error = %err, "Failed to clean up replaced deployment");
            }
        }

        info!(
            id = %function.id,
            entry_point = function.strategy.label(),
            code_length = function.code_length(),
            "Function deployed"
        );
        Ok(function)
    }

    /// Run a deployed function once.
    #[instrument(skip(self, payload, headers), fields(function = %name))]
    pub async fn execute(
        &self,
        name: &str,
        payload: Value,
        headers: BTreeMap<String, String>,
    ) -> FunctionResult<ExecutionReport> {
        let Some(function) = self.get(name) else {
            return Err(FunctionError::NotFound {
                name: name.to_string(),
                available: self.names(),
            });
        };

        let request = RequestView::new(self.function_url(name), payload, headers);
        let ctx = ExecutionContext::new(
            name,
            request,
            Duration::from_millis(self.config.timeout_ms),
        );

        let started = Instant::now();
        let result = self.sandbox.run(&function, &ctx).await;
        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(raw) => {
                let (shape, outcome) = normalize(raw);
                self.mark(&function, FunctionStatus::Deployed);
                info!(
                    invocation = %ctx.invocation_id,
                    elapsed_ms,
                    status = outcome.status,
                    shape = ?shape,
                    "Function executed"
                );
                Ok(ExecutionReport {
                    outcome,
                    shape,
                    elapsed,
                })
            }
            Err(err) => {
                if matches!(
                    err.kind(),
                    ErrorKind::EntryPointNotCallable | ErrorKind::NoEntryPointFound
                ) {
                    self.mark(&function, FunctionStatus::Error);
                }
                warn!(
                    invocation = %ctx.invocation_id,
                    elapsed_ms,
                    kind = %err.kind(),
                    error = %err,
                    "Function execution failed"
                );
                Err(err)
            }
        }
    }

    /// Record the entry-point health of a deployment.
    ///
    /// Ignored when the name has been redeployed or removed since `function`
    /// was looked up.
    fn mark(&self, function: &DeployedFunction, status: FunctionStatus) {
        if function.status == status {
            return;
        }
        let mut functions = self.write();
        if let Some(current) = functions.get_mut(&function.name) {
            if current.id == function.id && current.status != status {
                let mut updated = (**current).clone();
                updated.status = status;
                *current = Arc::new(updated);
            }
        }
    }

    /// Remove a function and release its scratch artifacts.
    ///
    /// Returns whether the name was deployed. Cleanup failures are logged and
    /// never keep the entry in the registry.
    #[instrument(skip(self), fields(function = %name))]
    pub async fn remove(&self, name: &str) -> bool {
        let removed = self.write().remove(name);
        let Some(function) = removed else {
            debug!("Nothing to remove");
            return false;
        };

        if let Err(err) = self.sandbox.release(&function).await {
            warn!(error = %err, "Failed to clean up removed function");
        }
        info!(id = %function.id, "Function removed");
        true
    }

    /// Remove every function. Used at shutdown.
    pub async fn clear(&self) -> usize {
        let drained: Vec<Arc<DeployedFunction>> =
            std::mem::take(&mut *self.write()).into_values().collect();
        for function in &drained {
            if let Err(err) = self.sandbox.release(function).await {
                warn!(function = %function.name, error = %err, "Failed to clean up function");
            }
        }
        drained.len()
    }

    pub fn get(&self, name: &str) -> Option<Arc<DeployedFunction>> {
        self.read().get(name).cloned()
    }

    pub fn details(&self, name: &str) -> Option<FunctionDetails> {
        self.get(name).map(|f| f.details(self.function_url(name)))
    }

    /// Summaries of every deployed function, ordered by name.
    pub fn list(&self) -> Vec<FunctionSummary> {
        self.read().values().map(|f| f.summary()).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
