//! HTTP request handlers: translate each bridge endpoint into a call
//! through the Execution Engine, persisting via the Job Store and
//! post-processing via the Response Rewriter.

use crate::bridge::AppState;
use crate::error::BridgeError;
use crate::job::JobStatus;
use crate::openapi;
use crate::rewriter;
use crate::session_key;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

fn json_response(status: StatusCode, value: Value) -> Response {
    (status, Json(value)).into_response()
}

fn json_rpc_error_envelope(code: i64, message: &str, id: Option<&Value>) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id.cloned().unwrap_or(Value::Null),
        "error": { "code": code, "message": message }
    })
}

fn bridge_error_response(e: &BridgeError, id: Option<&Value>) -> Response {
    json_response(e.status_code(), json_rpc_error_envelope(e.rpc_code(), &e.to_string(), id))
}

fn parse_body(bytes: &Bytes) -> Result<Value, Response> {
    serde_json::from_slice(bytes).map_err(|e| {
        warn!("failed to parse request body as JSON: {}", e);
        bridge_error_response(&BridgeError::MalformedBody(e.to_string()), None)
    })
}

fn peer_ip(connect_info: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    connect_info.map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Shared core: creates a job, executes `request` against `tag`, rewrites
/// the response, persists everything, and returns the HTTP response.
async fn process(
    state: &Arc<AppState>,
    tag: &str,
    headers: &HeaderMap,
    peer: Option<String>,
    request: Value,
) -> Response {
    state.record_request();

    let spec = match state.engine.lookup(tag) {
        Ok(spec) => spec,
        Err(e) => return bridge_error_response(&e, request.get("id")),
    };

    let client_ip = session_key::extract_client_ip(headers, peer.as_deref());
    let key = session_key::derive(headers, peer.as_deref(), state.settings.enable_forward_user_info_headers);

    let (job_id, job_dir) = match state.jobs.create(tag, Some(&client_ip)) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to create job directory: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json_rpc_error_envelope(-32603, "failed to create job directory", request.get("id")),
            );
        }
    };

    if let Err(e) = state.jobs.save_request(&job_id, &request) {
        error!(job_id, "failed to persist request: {}", e);
    }

    let outcome = state.engine.execute(tag, &request, &job_dir, Some(&key)).await;

    let mut exec_result = match outcome {
        Ok(result) => result,
        Err(e) => {
            let _ = state.jobs.update_status(&job_id, JobStatus::Failed, Some(&e.to_string()));
            return bridge_error_response(&e, request.get("id"));
        }
    };

    let actual_job_id = exec_result
        .effective_job_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| job_id.clone());

    rewriter::rewrite(
        &mut exec_result.response,
        &actual_job_id,
        &state.settings.base_url,
        &spec.file_path_fields,
    );

    if let Err(e) = state.jobs.save_response(&job_id, &exec_result.response) {
        error!(job_id, "failed to persist response: {}", e);
    }

    let status = if exec_result.exit_code == 0 {
        (JobStatus::Completed, None)
    } else {
        (JobStatus::Failed, Some(format!("Process exited with code {}", exec_result.exit_code)))
    };
    let _ = state.jobs.update_status(&job_id, status.0, status.1.as_deref());

    json_response(StatusCode::OK, exec_result.response)
}

/// `POST /mcp/{tag}`: raw JSON-RPC passthrough.
pub async fn raw_passthrough(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    process(&state, &tag, &headers, peer_ip(connect_info.as_ref()), request).await
}

/// `POST /mcpo/{tag}`: passthrough, or the legacy `_tool_name` tool-call
/// form when that field is present in the body.
pub async fn mcpo_legacy(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut request = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    if let Value::Object(map) = &mut request {
        if let Some(tool_name) = map.remove("_tool_name").and_then(|v| v.as_str().map(str::to_string)) {
            let arguments = Value::Object(map.clone());
            let envelope = tool_call_envelope(&tool_name, arguments);
            return process(&state, &tag, &headers, peer_ip(connect_info.as_ref()), envelope).await;
        }
    }

    process(&state, &tag, &headers, peer_ip(connect_info.as_ref()), request).await
}

/// `POST /mcpo/{tag}/{tool}`: OpenAPI-style call; the body is the
/// `arguments` object.
pub async fn tool_call(
    State(state): State<Arc<AppState>>,
    Path((tag, tool)): Path<(String, String)>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let arguments = match parse_body(&body) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let envelope = tool_call_envelope(&tool, arguments);
    process(&state, &tag, &headers, peer_ip(connect_info.as_ref()), envelope).await
}

fn tool_call_envelope(tool_name: &str, arguments: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": Uuid::new_v4().to_string(),
        "method": "tools/call",
        "params": { "name": tool_name, "arguments": arguments }
    })
}

/// `GET /mcpo/{tag}` and `GET /mcpo/{tag}/openapi.json`: synthesize an
/// OpenAPI 3.0 document from a fresh `tools/list` call.
pub async fn openapi_spec(
    State(state): State<Arc<AppState>>,
    Path(tag): Path<String>,
) -> Response {
    state.record_request();

    if let Err(e) = state.engine.lookup(&tag) {
        return bridge_error_response(&e, None);
    }

    let (job_id, job_dir) = match state.jobs.create(&tag, None) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to create job directory for openapi request: {}", e);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json_rpc_error_envelope(-32603, "failed to create job directory", None),
            );
        }
    };

    let request = serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}});
    let outcome = state.engine.execute(&tag, &request, &job_dir, None).await;
    let _ = state.jobs.update_status(
        &job_id,
        if outcome.is_ok() { JobStatus::Completed } else { JobStatus::Failed },
        None,
    );

    match outcome {
        Ok(result) => json_response(StatusCode::OK, openapi::synthesize(&tag, &state.settings.base_url, &result.response)),
        Err(e) => bridge_error_response(&e, None),
    }
}
