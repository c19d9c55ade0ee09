//! In-process sandbox double for registry and service tests.

use async_trait::async_trait;
use std::sync::Mutex;
use uuid::Uuid;

use super::Sandbox;
use crate::context::ExecutionContext;
use crate::error::{FunctionResult, SandboxError};
use crate::function::DeployedFunction;
use crate::normalizer::RawOutput;

type Script = dyn Fn(&DeployedFunction, &ExecutionContext) -> FunctionResult<RawOutput> + Send + Sync;

pub(crate) struct ScriptedSandbox {
    script: Box<Script>,
    fail_release: bool,
    pub(crate) installed: Mutex<Vec<Uuid>>,
    pub(crate) released: Mutex<Vec<Uuid>>,
    pub(crate) requests: Mutex<Vec<ExecutionContext>>,
}

impl ScriptedSandbox {
    pub(crate) fn new<F>(script: F) -> Self
    where
        F: Fn(&DeployedFunction, &ExecutionContext) -> FunctionResult<RawOutput> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            fail_release: false,
            installed: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every run returns `undefined`.
    pub(crate) fn silent() -> Self {
        Self::new(|_, _| Ok(RawOutput::default()))
    }

    pub(crate) fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn install(&self, function: &DeployedFunction) -> Result<(), SandboxError> {
        self.installed.lock().unwrap().push(function.id);
        Ok(())
    }

    async fn run(
        &self,
        function: &DeployedFunction,
        ctx: &ExecutionContext,
    ) -> FunctionResult<RawOutput> {
        self.requests.lock().unwrap().push(ctx.clone());
        (self.script)(function, ctx)
    }

    async fn release(&self, function: &DeployedFunction) -> Result<(), SandboxError> {
        self.released.lock().unwrap().push(function.id);
        if self.fail_release {
            return Err(SandboxError::Artifact("disk went away".to_string()));
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}
