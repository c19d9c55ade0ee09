//! Sandboxes that run deployed functions.
//!
//! A sandbox owns everything that touches a JavaScript runtime: it stages the
//! wrapped unit, runs it against one [`ExecutionContext`] under a wall-clock
//! budget and reports what the function returned and wrote to its response
//! builder. Normalization of that report happens in the registry.

mod node;
#[cfg(test)]
pub(crate) mod scripted;

pub use node::NodeSandbox;

use async_trait::async_trait;

use crate::context::ExecutionContext;
use crate::error::{FunctionResult, SandboxError};
use crate::function::DeployedFunction;
use crate::normalizer::RawOutput;

/// Trait for sandbox implementations.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Stage any artifacts a deployment needs before its first run.
    async fn install(&self, _function: &DeployedFunction) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Run a deployed function once.
    ///
    /// Must return within `ctx.timeout` plus a small margin; a run that
    /// exceeds its budget is abandoned and reported as
    /// [`crate::FunctionError::Timeout`].
    async fn run(
        &self,
        function: &DeployedFunction,
        ctx: &ExecutionContext,
    ) -> FunctionResult<RawOutput>;

    /// Drop the artifacts staged by [`Sandbox::install`].
    async fn release(&self, _function: &DeployedFunction) -> Result<(), SandboxError> {
        Ok(())
    }

    /// Whether the underlying runtime can be reached.
    async fn is_available(&self) -> bool;
}
