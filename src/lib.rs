//! # mcpo-bridge
//!
//! An HTTP-to-stdio bridge that routes JSON-RPC 2.0 requests to ephemeral
//! or session-pinned MCP tool programs speaking one JSON-RPC message per
//! line on stdin/stdout.
//!
//! ## Architecture
//!
//! *   **Execution Engine**: dispatches each request to a fresh ephemeral
//!     child or a session-pinned child from the Session Pool.
//! *   **Session Pool**: caches persistent children per `(server_tag,
//!     session_key)`, health-checks on reuse, and reaps idle children.
//! *   **Response Rewriter**: discovers file artifacts in a child's JSON
//!     response and rewrites them into download links.
//! *   **Garbage Collector**: periodically deletes expired job
//!     directories.

/// HTTP router assembly and the lifecycle supervisor.
pub mod bridge;
/// Config Registry and process-wide settings.
pub mod config;
/// Execution Engine: admission control and ephemeral/persistent dispatch.
pub mod engine;
/// Shared error type.
pub mod error;
/// Garbage Collector.
pub mod gc;
/// Job Store.
pub mod job;
/// OpenAPI synthesizer.
pub mod openapi;
/// HTTP request handlers.
pub mod request_handler;
/// Response Rewriter.
pub mod rewriter;
/// Session-key derivation and client-IP extraction.
pub mod session_key;
/// Session Pool.
pub mod session_pool;
/// Subprocess Driver.
pub mod subprocess;

pub use bridge::run;
pub use config::Settings;
pub use error::{BridgeError, Result};
