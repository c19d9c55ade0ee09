//! # basalt-functions
//!
//! Edge functions for Basalt: callers submit JavaScript source, Basalt finds
//! an entry point in it, runs it in a sandbox under a wall-clock budget and
//! hands back one canonical `{data, status, headers}` result.
//!
//! ## Pipeline
//!
//! ```text
//! deploy  -> validate -> CodeTransformer -> Sandbox::install -> FunctionRegistry
//! execute -> FunctionRegistry lookup -> ExecutionContext -> Sandbox::run -> normalize
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use basalt_core::FunctionsConfig;
//! use basalt_functions::FunctionService;
//! use serde_json::{json, Map};
//! use std::collections::BTreeMap;
//!
//! # async fn example() {
//! let service = FunctionService::with_node(FunctionsConfig::default());
//! service
//!     .deploy("add", "function add(req) { return req.a + req.b }\nadd", Map::new())
//!     .await;
//! let result = service.execute("add", json!({"a": 2, "b": 3}), BTreeMap::new()).await;
//! assert_eq!(result.data, Some(json!(5)));
//! # }
//! ```

pub mod context;
pub mod error;
pub mod function;
pub mod normalizer;
pub mod registry;
pub mod sandbox;
pub mod service;
pub mod transformer;

pub use context::{ExecutionContext, RequestView};
pub use error::{ErrorKind, FunctionError, FunctionResult, SandboxError};
pub use function::{DeployedFunction, FunctionDetails, FunctionStatus, FunctionSummary};
pub use normalizer::{normalize, BuilderState, ExecutionOutcome, RawOutput, ResultShape};
pub use registry::{ExecutionReport, FunctionRegistry};
pub use sandbox::{NodeSandbox, Sandbox};
pub use service::{DeploymentResult, ExecutionResult, FunctionService};
pub use transformer::{scan_declarations, CodeTransformer, EntryPointStrategy, TransformedSource};
