//! Error types for the functions crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type for function operations.
pub type FunctionResult<T> = Result<T, FunctionError>;

/// Errors surfaced by deploy and execute.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FunctionError {
    /// The submission was rejected before anything was stored.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No function is deployed under this name.
    #[error("function '{name}' not found (available: {})", display_names(.available))]
    NotFound {
        name: String,
        available: Vec<String>,
    },

    /// The trailing identifier of the source does not name a callable.
    #[error("entry point '{identifier}' is not callable (found {found})")]
    EntryPointNotCallable { identifier: String, found: String },

    /// No callable entry point could be located. Named exports are never
    /// tried, so the message points at the default-export convention.
    #[error(
        "no callable entry point found; named exports are not tried, export the function as default (module.exports = fn or export default fn); discovered: {}",
        display_names(.discovered)
    )]
    NoEntryPointFound { discovered: Vec<String> },

    /// The function asked for a module outside the allow-list.
    #[error("module '{module}' is not allowed in edge functions")]
    ModuleNotAllowed { module: String },

    /// Execution exceeded the wall-clock budget.
    #[error("function execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The function threw, or produced output the host could not read.
    #[error("runtime error: {0}")]
    RuntimeFault(String),

    /// No JavaScript runtime is reachable.
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    /// Host-side failure unrelated to the submitted code.
    #[error("internal error: {0}")]
    Internal(String),
}

fn display_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// Stable tag for each failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ValidationError,
    NotFound,
    EntryPointNotCallable,
    NoEntryPointFound,
    ModuleNotAllowed,
    Timeout,
    RuntimeFault,
    Unavailable,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ValidationError => "ValidationError",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::EntryPointNotCallable => "EntryPointNotCallable",
            ErrorKind::NoEntryPointFound => "NoEntryPointFound",
            ErrorKind::ModuleNotAllowed => "ModuleNotAllowed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::RuntimeFault => "RuntimeFault",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::Internal => "Internal",
        };
        f.write_str(s)
    }
}

impl FunctionError {
    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FunctionError::Validation(_) => ErrorKind::ValidationError,
            FunctionError::NotFound { .. } => ErrorKind::NotFound,
            FunctionError::EntryPointNotCallable { .. } => ErrorKind::EntryPointNotCallable,
            FunctionError::NoEntryPointFound { .. } => ErrorKind::NoEntryPointFound,
            FunctionError::ModuleNotAllowed { .. } => ErrorKind::ModuleNotAllowed,
            FunctionError::Timeout { .. } => ErrorKind::Timeout,
            FunctionError::RuntimeFault(_) => ErrorKind::RuntimeFault,
            FunctionError::Unavailable(_) => ErrorKind::Unavailable,
            FunctionError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP status code reported alongside a failed execution.
    pub fn status_code(&self) -> u16 {
        match self {
            FunctionError::Validation(_) => 400,
            FunctionError::NotFound { .. } => 404,
            FunctionError::EntryPointNotCallable { .. } => 422,
            FunctionError::NoEntryPointFound { .. } => 422,
            FunctionError::ModuleNotAllowed { .. } => 403,
            FunctionError::Timeout { .. } => 504,
            FunctionError::RuntimeFault(_) => 500,
            FunctionError::Unavailable(_) => 503,
            FunctionError::Internal(_) => 500,
        }
    }
}

/// Infrastructure failures inside a sandbox implementation.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The runtime binary could not be started.
    #[error("failed to start sandbox: {0}")]
    StartFailed(String),

    /// Scratch artifacts could not be written or removed.
    #[error("scratch artifact error: {0}")]
    Artifact(String),

    /// The sandbox produced output that does not follow the harness protocol.
    #[error("malformed sandbox output: {0}")]
    Protocol(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SandboxError> for FunctionError {
    fn from(err: SandboxError) -> Self {
        match err {
            SandboxError::StartFailed(msg) => FunctionError::Unavailable(msg),
            SandboxError::Protocol(msg) => FunctionError::RuntimeFault(msg),
            other => FunctionError::Internal(other.to_string()),
        }
    }
}
