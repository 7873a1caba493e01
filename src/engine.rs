//! Execution Engine: admission control, ephemeral vs. session-pinned
//! dispatch, usage-guide injection.

use crate::config::{ConfigRegistry, ServerSpec};
use crate::error::{BridgeError, Result};
use crate::session_pool::SessionPool;
use crate::subprocess;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info};

const USAGE_GUIDE_TOOL_NAME: &str = "📖_usage_instructions";

/// One executed request's outcome: the JSON-RPC response, the child's exit
/// code (an in-band status summary, not evidence the process was killed),
/// and the job directory path rewriting should treat as the artifact root.
pub struct ExecutionResult {
    pub response: Value,
    pub exit_code: i32,
    pub effective_job_dir: PathBuf,
}

/// Threads the config registry, session pool, and admission semaphore
/// through request handling as one constructed-once value.
pub struct ExecutionEngine {
    config: Arc<ConfigRegistry>,
    pool: Arc<SessionPool>,
    admission: Semaphore,
    persistent_enabled: bool,
    default_timeout: Duration,
}

impl ExecutionEngine {
    pub fn new(
        config: Arc<ConfigRegistry>,
        pool: Arc<SessionPool>,
        max_concurrent: usize,
        persistent_enabled: bool,
        default_timeout: Duration,
    ) -> Self {
        Self {
            config,
            pool,
            admission: Semaphore::new(max_concurrent),
            persistent_enabled,
            default_timeout,
        }
    }

    pub fn lookup(&self, server_tag: &str) -> Result<ServerSpec> {
        self.config
            .get(server_tag)
            .cloned()
            .ok_or_else(|| BridgeError::UnknownServerType(server_tag.to_string()))
    }

    pub async fn execute(
        &self,
        server_tag: &str,
        request: &Value,
        job_dir: &Path,
        session_key: Option<&str>,
    ) -> Result<ExecutionResult> {
        let spec = self.lookup(server_tag)?;

        let persistent = self.persistent_enabled && spec.is_persistent() && session_key.is_some();

        let mut result = if persistent {
            self.execute_persistent(&spec, request, job_dir, session_key.unwrap())
                .await?
        } else {
            self.execute_ephemeral(&spec, request, job_dir).await?
        };

        if request.get("method").and_then(Value::as_str) == Some("tools/list") {
            inject_usage_guide(&spec.tag, request, &mut result.response, spec.usage_guide.as_deref());
        }

        Ok(result)
    }

    async fn execute_ephemeral(
        &self,
        spec: &ServerSpec,
        request: &Value,
        job_dir: &Path,
    ) -> Result<ExecutionResult> {
        let _permit = self
            .admission
            .acquire()
            .await
            .expect("admission semaphore is never closed");

        debug!(server_tag = %spec.tag, "dispatching ephemeral request");
        let mut child = subprocess::start(spec, job_dir).await?;

        let outcome = subprocess::exchange(&mut child, request, self.default_timeout).await;
        subprocess::terminate(&mut child).await;

        let exchange = outcome?;
        Ok(ExecutionResult {
            response: exchange.response,
            exit_code: exchange.exit_code,
            effective_job_dir: job_dir.to_path_buf(),
        })
    }

    async fn execute_persistent(
        &self,
        spec: &ServerSpec,
        request: &Value,
        job_dir: &Path,
        session_key: &str,
    ) -> Result<ExecutionResult> {
        let child = self.pool.get_or_create(spec, job_dir, session_key).await?;
        // `effective_job_dir` is the cwd the child was started with, which
        // may predate this request.
        let effective_job_dir = child.cwd.clone();

        info!(
            server_tag = %spec.tag,
            session_key,
            "dispatching to pooled child"
        );
        let exchange = self
            .pool
            .exchange(&child, request, self.default_timeout)
            .await?;

        Ok(ExecutionResult {
            response: exchange.response,
            exit_code: exchange.exit_code,
            effective_job_dir,
        })
    }
}

/// Splices a synthetic first tool entry into a `tools/list` response whose
/// `name` is the fixed marker and whose `description` is the configured
/// usage guide.
fn inject_usage_guide(_server_tag: &str, _request: &Value, response: &mut Value, usage_guide: Option<&str>) {
    let Some(guide) = usage_guide else { return };
    if guide.is_empty() {
        return;
    }

    let Some(tools) = response
        .get_mut("result")
        .and_then(|r| r.get_mut("tools"))
        .and_then(Value::as_array_mut)
    else {
        return;
    };

    tools.insert(
        0,
        serde_json::json!({
            "name": USAGE_GUIDE_TOOL_NAME,
            "description": guide,
        }),
    );
}
