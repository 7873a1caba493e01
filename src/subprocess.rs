//! Subprocess Driver: start a tool program, exchange one JSON-RPC line,
//! terminate it.
//!
//! MCP children emit a JSON-RPC response as exactly one line and often
//! remain alive afterward (persistent mode) or exit immediately (ephemeral).
//! The driver must not couple response capture to process exit.

use crate::config::ServerSpec;
use crate::error::{BridgeError, Result};
use serde_json::Value;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{error, warn};

const STARTUP_GRACE: Duration = Duration::from_millis(100);
const STDIO_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const SIGTERM_GRACE: Duration = Duration::from_secs(10);
const SIGKILL_GRACE: Duration = Duration::from_secs(5);
const PARSE_ERROR_DATA_CAP: usize = 500;

/// Starts `spec.command` with piped stdio under `cwd`, exporting
/// `MCPO_WORKDIR`/`MCPO_JOB_ID` alongside `spec.env`.
///
/// Observes the child for ~100ms; if it has already exited, captures stderr
/// and reports a startup failure rather than handing back a dead child.
pub async fn start(spec: &ServerSpec, cwd: &Path) -> Result<Child> {
    let job_id = cwd
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let mut command = Command::new(&spec.command);
    command
        .args(&spec.args)
        .envs(&spec.env)
        .env("MCPO_WORKDIR", cwd)
        .env("MCPO_JOB_ID", &job_id)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .map_err(|e| BridgeError::StartupFailure(format!("failed to spawn {}: {}", spec.command, e)))?;

    tokio::time::sleep(STARTUP_GRACE).await;

    if let Ok(Some(status)) = child.try_wait() {
        let stderr_tail = match child.stderr.take() {
            Some(stderr) => read_available(stderr).await,
            None => String::new(),
        };
        return Err(BridgeError::StartupFailure(format!(
            "{} exited immediately with {}: {}",
            spec.command, status, stderr_tail
        )));
    }

    Ok(child)
}

async fn read_available(stderr: tokio::process::ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut out = String::new();
    let _ = tokio::time::timeout(Duration::from_millis(200), reader.read_line(&mut out)).await;
    out.trim().to_string()
}

/// Outcome of one JSON-RPC exchange with a child.
pub struct Exchange {
    pub response: Value,
    pub exit_code: i32,
}

/// Writes one JSON-RPC request line to `child`'s stdin and reads one
/// response line from stdout, bounded by `timeout`.
///
/// A request without an `"id"` field is a notification: the write completes
/// and `{}` is returned immediately without waiting for a response line.
pub async fn exchange(child: &mut Child, request: &Value, timeout: Duration) -> Result<Exchange> {
    let is_notification = request.get("id").is_none();
    let request_id = request.get("id").cloned();

    let stdin = child
        .stdin
        .as_mut()
        .ok_or_else(|| BridgeError::Communication("child has no stdin".into()))?;

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');

    tokio::time::timeout(STDIO_WRITE_TIMEOUT, async {
        stdin.write_all(&line).await?;
        stdin.flush().await
    })
    .await
    .map_err(|_| BridgeError::Communication("timed out writing to child stdin".into()))?
    .map_err(|e| BridgeError::Communication(format!("failed to write to child stdin: {}", e)))?;

    if is_notification {
        return Ok(Exchange {
            response: serde_json::json!({}),
            exit_code: 0,
        });
    }

    let stdout = child
        .stdout
        .as_mut()
        .ok_or_else(|| BridgeError::Communication("child has no stdout".into()))?;
    let mut reader = BufReader::new(stdout);
    let mut raw_line = String::new();

    let read_result = tokio::time::timeout(timeout, reader.read_line(&mut raw_line)).await;

    let response = match read_result {
        Err(_) => return Err(BridgeError::Timeout(timeout.as_secs())),
        Ok(Err(e)) => {
            return Err(BridgeError::Communication(format!(
                "failed to read from child stdout: {}",
                e
            )))
        }
        Ok(Ok(_)) => parse_response_line(&raw_line, request_id.as_ref()),
    };

    let exit_code = match child.try_wait() {
        Ok(Some(status)) => status.code().unwrap_or(-1),
        Ok(None) => 0,
        Err(e) => {
            warn!("failed to poll child exit status: {}", e);
            0
        }
    };

    Ok(Exchange { response, exit_code })
}

fn parse_response_line(raw_line: &str, request_id: Option<&Value>) -> Value {
    let trimmed = raw_line.trim_end_matches(['\n', '\r']);

    if trimmed.is_empty() {
        return json_rpc_error(-32603, "No response from MCP server", None, request_id);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => value,
        Err(_) => {
            let mut data = trimmed.to_string();
            data.truncate(PARSE_ERROR_DATA_CAP);
            json_rpc_error(-32700, "Parse error", Some(data), request_id)
        }
    }
}

fn json_rpc_error(code: i64, message: &str, data: Option<String>, request_id: Option<&Value>) -> Value {
    let mut error = serde_json::json!({ "code": code, "message": message });
    if let Some(data) = data {
        error["data"] = Value::String(data);
    }
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": request_id.cloned().unwrap_or(Value::Null),
        "error": error,
    })
}

/// Terminates `child` gracefully: SIGTERM, wait up to 10s, then SIGKILL,
/// wait up to 5s. Errors are logged, never raised.
pub async fn terminate(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let pid = pid as i32;

    if matches!(child.try_wait(), Ok(Some(_))) {
        return;
    }

    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }

    if wait_for_exit(child, SIGTERM_GRACE).await {
        return;
    }

    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }

    if !wait_for_exit(child, SIGKILL_GRACE).await {
        error!(pid, "child did not exit after SIGKILL within grace period");
    }
}

async fn wait_for_exit(child: &mut Child, budget: Duration) -> bool {
    tokio::time::timeout(budget, child.wait()).await.is_ok()
}
