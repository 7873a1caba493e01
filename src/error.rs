//! Error types shared across the bridge.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown server type: {0}")]
    UnknownServerType(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("server process failed to start: {0}")]
    StartupFailure(String),

    #[error("subprocess communication error: {0}")]
    Communication(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("session capacity exceeded for {0}")]
    CapacityExceeded(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Maps an error to its corresponding HTTP status.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BridgeError::UnknownServerType(_) => StatusCode::NOT_FOUND,
            BridgeError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            BridgeError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::StartupFailure(_)
            | BridgeError::Communication(_)
            | BridgeError::Io(_)
            | BridgeError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON-RPC error code used when synthesizing an error envelope.
    pub fn rpc_code(&self) -> i64 {
        match self {
            BridgeError::MalformedBody(_) => -32600,
            BridgeError::UnknownServerType(_) => -32601,
            BridgeError::Timeout(_) => -32000,
            BridgeError::CapacityExceeded(_) => -32001,
            _ => -32603,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_expected_http_codes() {
        assert_eq!(
            BridgeError::UnknownServerType("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BridgeError::MalformedBody("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BridgeError::Timeout(5).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            BridgeError::CapacityExceeded("x".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            BridgeError::Communication("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
