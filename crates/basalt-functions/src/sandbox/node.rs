//! Node.js subprocess sandbox.
//!
//! Every run is a fresh `node` process executing the bundled harness against
//! the deployment's staged `function.js`. The process is the isolation unit:
//! it gets an empty environment apart from `PATH`, a scratch working
//! directory, and is killed when its wall-clock budget runs out.
//!
//! Node is started with `--disallow-code-generation-from-strings`, which
//! closes the host-realm `Function` constructor reachable through any host
//! object handed to the vm context. Where the runtime supports it, Node's
//! permission model is enabled too: the process may read only its deployment
//! directory and may not spawn children, start workers or load addons.
//!
//! Scratch layout: `<scratch_dir>/<function name>/<deployment id>/`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use basalt_core::FunctionsConfig;

use super::Sandbox;
use crate::context::ExecutionContext;
use crate::error::{FunctionError, FunctionResult, SandboxError};
use crate::function::DeployedFunction;
use crate::normalizer::{BuilderState, RawOutput};

const HARNESS: &str = include_str!("harness.js");
const HARNESS_FILE: &str = "harness.js";
const UNIT_FILE: &str = "function.js";
const RESULT_MARKER: &str = "__BASALT_RESULT__ ";
const STDERR_LIMIT: usize = 16 * 1024;
const STDERR_TAIL: usize = 1024;
const VERSION_TIMEOUT: Duration = Duration::from_secs(5);

/// `major.minor` of the Node runtime, as reported by `node --version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct NodeVersion {
    major: u32,
    minor: u32,
}

impl NodeVersion {
    fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().trim_start_matches('v').split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some(Self { major, minor })
    }
}

/// Flags that enable Node's permission model for one deployment directory.
///
/// `--permission` is stable from 23.5; 20.0 through 23.4 only know the
/// experimental flag and need a wildcard to cover a directory's contents.
/// Older runtimes get nothing.
fn permission_args(version: Option<NodeVersion>, dir: &Path) -> Vec<OsString> {
    let Some(version) = version else {
        return Vec::new();
    };
    let stable = NodeVersion { major: 23, minor: 5 };
    let experimental = NodeVersion { major: 20, minor: 0 };

    let (flag, allowed) = if version >= stable {
        ("--permission", dir.to_path_buf())
    } else if version >= experimental {
        ("--experimental-permission", dir.join("*"))
    } else {
        return Vec::new();
    };

    let mut read = OsString::from("--allow-fs-read=");
    read.push(allowed.as_os_str());
    vec![OsString::from(flag), read]
}

/// Runs deployed functions in short-lived Node.js processes.
#[derive(Debug, Clone)]
pub struct NodeSandbox {
    node_binary: String,
    scratch_dir: PathBuf,
    max_output_bytes: usize,
    version: Arc<OnceCell<Option<NodeVersion>>>,
}

impl NodeSandbox {
    /// Create a sandbox using `node_binary` and staging under `scratch_dir`.
    pub fn new(node_binary: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            node_binary: node_binary.into(),
            scratch_dir: scratch_dir.into(),
            max_output_bytes: 1024 * 1024,
            version: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_config(config: &FunctionsConfig) -> Self {
        Self::new(config.node_binary.clone(), config.resolved_scratch_dir())
            .with_max_output_bytes(config.max_output_bytes)
    }

    /// Cap on the bytes a single run may write back to the host.
    #[must_use]
    pub fn with_max_output_bytes(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    fn deployment_dir(&self, function: &DeployedFunction) -> PathBuf {
        self.scratch_dir
            .join(&function.name)
            .join(function.id.to_string())
    }

    fn command(&self, dir: &Path, version: Option<NodeVersion>) -> Command {
        let mut cmd = Command::new(&self.node_binary);
        cmd.arg("--disallow-code-generation-from-strings")
            .args(permission_args(version, dir))
            .arg(dir.join(HARNESS_FILE))
            .current_dir(dir)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(path) = std::env::var_os("PATH") {
            cmd.env("PATH", path);
        }
        cmd
    }

    /// Ask the runtime for its version with `node --version`.
    async fn query_version(&self) -> Result<String, String> {
        let mut cmd = Command::new(&self.node_binary);
        cmd
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(VERSION_TIMEOUT, cmd.output()).await {
            Ok(Ok(out)) if out.status.success() => {
                Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
            }
            Ok(Ok(out)) => Err(format!("exited with {}", out.status)),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("timed out".to_string()),
        }
    }

    /// Runtime version, queried once per sandbox.
    async fn version(&self) -> Option<NodeVersion> {
        *self
            .version
            .get_or_init(|| async {
                let version = self
                    .query_version()
                    .await
                    .ok()
                    .and_then(|text| NodeVersion::parse(&text));
                if version.is_none() {
                    warn!(
                        binary = %self.node_binary,
                        "Could not determine Node version; running without the permission model"
                    );
                }
                version
            })
            .await
    }

    async fn is_staged(dir: &Path) -> bool {
        tokio::fs::metadata(dir.join(HARNESS_FILE)).await.is_ok()
            && tokio::fs::metadata(dir.join(UNIT_FILE)).await.is_ok()
    }
}

#[async_trait]
impl Sandbox for NodeSandbox {
    #[instrument(skip(self, function), fields(sandbox = "node", function = %function.name))]
    async fn install(&self, function: &DeployedFunction) -> Result<(), SandboxError> {
        let dir = self.deployment_dir(function);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SandboxError::Artifact(format!("cannot create {}: {}", dir.display(), e)))?;

        for (file, contents) in [
            (HARNESS_FILE, HARNESS),
            (UNIT_FILE, function.wrapped_source.as_str()),
        ] {
            let path = dir.join(file);
            tokio::fs::write(&path, contents)
                .await
                .map_err(|e| SandboxError::Artifact(format!("cannot write {}: {}", path.display(), e)))?;
        }

        debug!(dir = %dir.display(), "Staged function artifacts");
        Ok(())
    }

    #[instrument(
        skip(self, function, ctx),
        fields(sandbox = "node", function = %function.name, invocation = %ctx.invocation_id)
    )]
    async fn run(
        &self,
        function: &DeployedFunction,
        ctx: &ExecutionContext,
    ) -> FunctionResult<RawOutput> {
        let dir = self.deployment_dir(function);
        if !Self::is_staged(&dir).await {
            return Err(SandboxError::Artifact(format!(
                "artifacts for '{}' are missing from {}",
                function.name,
                dir.display()
            ))
            .into());
        }

        let input = serde_json::to_vec(&json!({
            "invocationId": ctx.invocation_id,
            "functionName": ctx.function_name,
            "timeoutMs": ctx.timeout_ms(),
            "request": ctx.request,
        }))
        .map_err(|e| FunctionError::Internal(format!("cannot encode invocation: {}", e)))?;

        let dir = tokio::fs::canonicalize(&dir).await.unwrap_or(dir);
        let version = self.version().await;
        let mut child = self.command(&dir, version).spawn().map_err(|e| {
            SandboxError::StartFailed(format!("cannot start '{}': {}", self.node_binary, e))
        })?;

        let exchange = tokio::time::timeout(
            ctx.timeout,
            communicate(&mut child, input, self.max_output_bytes),
        )
        .await;

        let output = match exchange {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                terminate(&mut child).await;
                return Err(err);
            }
            Err(_) => {
                warn!(timeout_ms = ctx.timeout_ms(), "Function timed out, killing sandbox process");
                terminate(&mut child).await;
                return Err(FunctionError::Timeout {
                    timeout_ms: ctx.timeout_ms(),
                });
            }
        };

        let raw = interpret(output, self.max_output_bytes, ctx.timeout_ms());
        if let Ok(raw) = &raw {
            forward_logs(&function.name, &raw.logs);
        }
        raw
    }

    #[instrument(skip(self, function), fields(sandbox = "node", function = %function.name))]
    async fn release(&self, function: &DeployedFunction) -> Result<(), SandboxError> {
        let dir = self.deployment_dir(function);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(dir = %dir.display(), "Removed function artifacts"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SandboxError::Artifact(format!(
                    "cannot remove {}: {}",
                    dir.display(),
                    e
                )));
            }
        }
        // Only succeeds once the last deployment under this name is gone.
        if let Some(parent) = dir.parent() {
            tokio::fs::remove_dir(parent).await.ok();
        }
        Ok(())
    }

    async fn is_available(&self) -> bool {
        match self.query_version().await {
            Ok(version) => {
                debug!(version = %version, "Node runtime found");
                true
            }
            Err(reason) => {
                debug!(binary = %self.node_binary, reason = %reason, "Node runtime not reachable");
                false
            }
        }
    }
}

struct ChildOutput {
    stdout: Vec<u8>,
    stdout_overflow: bool,
    stderr: Vec<u8>,
    exit_code: Option<i32>,
}

async fn communicate(child: &mut Child, input: Vec<u8>, limit: usize) -> FunctionResult<ChildOutput> {
    let (Some(mut stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(FunctionError::Internal(
            "sandbox process pipes were not captured".to_string(),
        ));
    };

    let feed = async move {
        stdin.write_all(&input).await?;
        stdin.shutdown().await
    };
    let (fed, out, err) = tokio::join!(
        feed,
        read_bounded(stdout, limit),
        read_bounded(stderr, STDERR_LIMIT)
    );

    if let Err(e) = fed {
        // The process may exit before reading its input; stdout tells the rest.
        debug!(error = %e, "Could not feed invocation to sandbox process");
    }
    let (stdout, stdout_overflow) =
        out.map_err(|e| FunctionError::Internal(format!("cannot read sandbox output: {}", e)))?;
    let (stderr, _) =
        err.map_err(|e| FunctionError::Internal(format!("cannot read sandbox stderr: {}", e)))?;

    let status = child
        .wait()
        .await
        .map_err(|e| FunctionError::Internal(format!("cannot reap sandbox process: {}", e)))?;

    Ok(ChildOutput {
        stdout,
        stdout_overflow,
        stderr,
        exit_code: status.code(),
    })
}

/// Read to EOF, keeping at most `limit` bytes.
async fn read_bounded<R: AsyncRead + Unpin>(
    mut reader: R,
    limit: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let mut kept = Vec::new();
    let mut overflow = false;
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        if n > room {
            overflow = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok((kept, overflow))
}

async fn terminate(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(error = %err, "Sandbox process already gone");
    }
    if let Err(err) = child.wait().await {
        debug!(error = %err, "Could not reap sandbox process");
    }
}

fn forward_logs(function: &str, logs: &[String]) {
    for line in logs {
        debug!(target: "basalt_functions::function_log", function, "{}", line);
    }
}

/// Result line written by the harness.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ok: bool,
    #[serde(default)]
    has_return: bool,
    #[serde(default)]
    returned: Value,
    #[serde(default)]
    builder: BuilderState,
    #[serde(default)]
    logs: Vec<String>,
    #[serde(default)]
    error: Option<HarnessFailure>,
}

#[derive(Debug, Deserialize)]
struct HarnessFailure {
    kind: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    identifier: Option<String>,
    #[serde(default)]
    found: Option<String>,
    #[serde(default)]
    discovered: Vec<String>,
    #[serde(default)]
    module: Option<String>,
}

impl HarnessFailure {
    fn into_error(self, timeout_ms: u64) -> FunctionError {
        match self.kind.as_str() {
            "EntryPointNotCallable" => FunctionError::EntryPointNotCallable {
                identifier: self.identifier.unwrap_or_default(),
                found: self.found.unwrap_or_else(|| "undefined".to_string()),
            },
            "NoEntryPointFound" => FunctionError::NoEntryPointFound {
                discovered: self.discovered,
            },
            "ModuleNotAllowed" => FunctionError::ModuleNotAllowed {
                module: self.module.unwrap_or_default(),
            },
            "Timeout" => FunctionError::Timeout { timeout_ms },
            _ => FunctionError::RuntimeFault(self.message),
        }
    }
}

fn interpret(output: ChildOutput, limit: usize, timeout_ms: u64) -> FunctionResult<RawOutput> {
    if output.stdout_overflow {
        return Err(FunctionError::RuntimeFault(format!(
            "function output exceeded {} bytes",
            limit
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(line) = stdout
        .lines()
        .rev()
        .find_map(|l| l.strip_prefix(RESULT_MARKER))
    else {
        let reason = match output.exit_code {
            Some(0) => "function finished without producing a result (is a promise left pending?)"
                .to_string(),
            Some(code) => format!(
                "sandbox process exited with code {}: {}",
                code,
                stderr_tail(&output.stderr)
            ),
            None => format!(
                "sandbox process was terminated: {}",
                stderr_tail(&output.stderr)
            ),
        };
        return Err(SandboxError::Protocol(reason).into());
    };

    let envelope: Envelope = serde_json::from_str(line)
        .map_err(|e| SandboxError::Protocol(format!("unreadable result line: {}", e)))?;

    if !envelope.ok {
        for log in &envelope.logs {
            debug!(target: "basalt_functions::function_log", "{}", log);
        }
        let failure = envelope.error.unwrap_or(HarnessFailure {
            kind: "RuntimeFault".to_string(),
            message: "function failed without an error description".to_string(),
            identifier: None,
            found: None,
            discovered: Vec::new(),
            module: None,
        });
        return Err(failure.into_error(timeout_ms));
    }

    Ok(RawOutput {
        returned: envelope.has_return.then_some(envelope.returned),
        builder: envelope.builder,
        logs: envelope.logs,
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }
    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn output(stdout: &str) -> ChildOutput {
        ChildOutput {
            stdout: stdout.as_bytes().to_vec(),
            stdout_overflow: false,
            stderr: Vec::new(),
            exit_code: Some(0),
        }
    }

    #[test]
    fn test_interpret_success_envelope() {
        let line = format!(
            "{}{}\n",
            RESULT_MARKER,
            json!({
                "ok": true,
                "hasReturn": true,
                "returned": {"sum": 5},
                "builder": {"written": false, "status": null, "headers": {}, "body": null},
                "logs": ["[log] hello"]
            })
        );
        let raw = interpret(output(&line), 1024, 1000).unwrap();
        assert_eq!(raw.returned, Some(json!({"sum": 5})));
        assert!(!raw.builder.written);
        assert_eq!(raw.logs, vec!["[log] hello".to_string()]);
    }

    #[test]
    fn test_undefined_return_is_none_but_null_is_kept() {
        let undefined = format!("{}{}", RESULT_MARKER, json!({"ok": true, "hasReturn": false, "returned": null}));
        assert_eq!(interpret(output(&undefined), 1024, 1000).unwrap().returned, None);

        let null = format!("{}{}", RESULT_MARKER, json!({"ok": true, "hasReturn": true, "returned": null}));
        assert_eq!(interpret(output(&null), 1024, 1000).unwrap().returned, Some(Value::Null));
    }

    #[test]
    fn test_interpret_failure_kinds() {
        let cases = [
            (json!({"kind": "EntryPointNotCallable", "identifier": "handler", "found": "undefined"}), ErrorKind::EntryPointNotCallable),
            (json!({"kind": "NoEntryPointFound", "discovered": ["x (number)"]}), ErrorKind::NoEntryPointFound),
            (json!({"kind": "ModuleNotAllowed", "module": "fs"}), ErrorKind::ModuleNotAllowed),
            (json!({"kind": "Timeout", "message": "Script execution timed out"}), ErrorKind::Timeout),
            (json!({"kind": "RuntimeFault", "message": "TypeError: boom"}), ErrorKind::RuntimeFault),
        ];
        for (error, kind) in cases {
            let line = format!(
                "{}{}",
                RESULT_MARKER,
                json!({"ok": false, "error": error.clone(), "logs": []})
            );
            let err = interpret(output(&line), 1024, 250).unwrap_err();
            assert_eq!(err.kind(), kind, "{}", error);
        }
    }

    #[test]
    fn test_module_name_is_preserved() {
        let line = format!(
            "{}{}",
            RESULT_MARKER,
            json!({"ok": false, "error": {"kind": "ModuleNotAllowed", "message": "no", "module": "child_process"}})
        );
        assert_eq!(
            interpret(output(&line), 1024, 250).unwrap_err(),
            FunctionError::ModuleNotAllowed {
                module: "child_process".to_string()
            }
        );
    }

    #[test]
    fn test_missing_result_line() {
        let err = interpret(output("stray text\n"), 1024, 1000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeFault);
        assert!(err.to_string().contains("pending"));

        let crashed = ChildOutput {
            stdout: Vec::new(),
            stdout_overflow: false,
            stderr: b"SyntaxError: Unexpected token".to_vec(),
            exit_code: Some(1),
        };
        let err = interpret(crashed, 1024, 1000).unwrap_err();
        assert!(err.to_string().contains("SyntaxError"));
    }

    #[test]
    fn test_output_overflow_is_a_runtime_fault() {
        let mut out = output("");
        out.stdout_overflow = true;
        let err = interpret(out, 16, 1000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RuntimeFault);
        assert!(err.to_string().contains("16 bytes"));
    }

    #[tokio::test]
    async fn test_read_bounded_truncates_and_flags() {
        let data = vec![b'x'; 100];
        let (kept, overflow) = read_bounded(&data[..], 40).await.unwrap();
        assert_eq!(kept.len(), 40);
        assert!(overflow);

        let (kept, overflow) = read_bounded(&data[..], 100).await.unwrap();
        assert_eq!(kept.len(), 100);
        assert!(!overflow);
    }

    #[tokio::test]
    async fn test_install_and_release_scratch_artifacts() {
        let scratch = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new("node", scratch.path());
        let source = "function hello() { return 1 }\nhello".to_string();
        let transformed = crate::transformer::CodeTransformer::new().transform(&source);
        let function =
            DeployedFunction::new("hello".into(), source, transformed, serde_json::Map::new());

        sandbox.install(&function).await.unwrap();
        let dir = scratch.path().join("hello").join(function.id.to_string());
        assert!(dir.join(HARNESS_FILE).exists());
        let staged = std::fs::read_to_string(dir.join(UNIT_FILE)).unwrap();
        assert_eq!(staged, function.wrapped_source);

        sandbox.release(&function).await.unwrap();
        assert!(!dir.exists());
        assert!(!scratch.path().join("hello").exists());

        // Releasing twice is not an error.
        sandbox.release(&function).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let scratch = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new("/nonexistent/basalt-node", scratch.path());
        assert!(!sandbox.is_available().await);
    }

    #[test]
    fn test_parse_node_version() {
        assert_eq!(
            NodeVersion::parse("v22.11.0\n"),
            Some(NodeVersion { major: 22, minor: 11 })
        );
        assert_eq!(NodeVersion::parse("v8"), None);
        assert_eq!(NodeVersion::parse("not a version"), None);
    }

    #[test]
    fn test_permission_args_follow_runtime_version() {
        let dir = Path::new("/tmp/basalt/hello/1");
        let args = |major, minor| permission_args(Some(NodeVersion { major, minor }), dir);

        assert_eq!(
            args(24, 0),
            vec![OsString::from("--permission"), OsString::from("--allow-fs-read=/tmp/basalt/hello/1")]
        );
        assert_eq!(args(23, 5)[0], OsString::from("--permission"));
        assert_eq!(
            args(22, 11),
            vec![
                OsString::from("--experimental-permission"),
                OsString::from("--allow-fs-read=/tmp/basalt/hello/1/*")
            ]
        );
        assert_eq!(args(20, 0)[0], OsString::from("--experimental-permission"));
        assert!(args(18, 19).is_empty());
        assert!(permission_args(None, dir).is_empty());

        // child processes, workers and addons stay denied
        assert!(
            args(24, 0)
                .iter()
                .all(|a| !a.to_string_lossy().starts_with("--allow-child-process"))
        );
    }

    #[test]
    fn test_command_blocks_string_code_generation() {
        let scratch = tempfile::tempdir().unwrap();
        let sandbox = NodeSandbox::new("node", scratch.path());
        let dir = scratch.path().join("hello");
        let cmd = sandbox.command(&dir, Some(NodeVersion { major: 22, minor: 0 }));
        let args: Vec<_> = cmd.as_std().get_args().map(|a| a.to_os_string()).collect();

        assert_eq!(args[0], OsString::from("--disallow-code-generation-from-strings"));
        assert_eq!(args[1], OsString::from("--experimental-permission"));
        assert_eq!(args.last(), Some(&dir.join(HARNESS_FILE).into_os_string()));
    }
}
