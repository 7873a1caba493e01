//! Shared test-server harness: spawns the compiled `mcpo-bridge` binary
//! against a temporary config and jobs directory, waits for `/health`, and
//! tears the process down on drop.

use reqwest::Client;
use serde_json::Value;
use std::io::Write;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::sleep;

pub struct TestServer {
    child: Child,
    pub base_url: String,
    pub jobs_dir: TempDir,
    _config: NamedTempFile,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("failed to bind to any port")
        .local_addr()
        .expect("failed to read local addr")
        .port()
}

async fn wait_for_health(base_url: &str) -> bool {
    let client = Client::new();
    let url = format!("{base_url}/health");
    for _ in 0..50 {
        sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(url.as_str()).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
    }
    false
}

/// Starts the bridge with `mcp_servers` as the `mcpServers` body of the
/// config file, applying any `extra_env` overrides on top of short defaults
/// suited to tests (1s timeout, 1s stateful cleanup interval).
pub async fn spawn_bridge(mcp_servers: Value, extra_env: &[(&str, &str)]) -> TestServer {
    let mut config = NamedTempFile::new().expect("failed to create temp config file");
    let contents = serde_json::json!({ "mcpServers": mcp_servers });
    config
        .write_all(serde_json::to_string(&contents).unwrap().as_bytes())
        .expect("failed to write temp config file");

    let jobs_dir = TempDir::new().expect("failed to create temp jobs dir");
    let port = find_available_port();
    let base_url = format!("http://127.0.0.1:{port}");

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mcpo-bridge"));
    cmd.env("MCPO_CONFIG_FILE", config.path())
        .env("MCPO_JOBS_DIR", jobs_dir.path())
        .env("MCPO_BASE_URL", &base_url)
        .env("MCPO_BIND_ADDR", format!("127.0.0.1:{port}"))
        .env("MCPO_TIMEOUT", "1")
        .env("MCPO_FILE_EXPIRY", "3600")
        .env("MCPO_STATEFUL_CLEANUP_INTERVAL", "1")
        .env("MCPO_LOG_LEVEL", "warn")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    for (key, value) in extra_env {
        cmd.env(key, value);
    }

    let child = cmd.spawn().expect("failed to spawn mcpo-bridge");

    let server = TestServer {
        child,
        base_url,
        jobs_dir,
        _config: config,
    };

    assert!(
        wait_for_health(&server.base_url).await,
        "mcpo-bridge did not become healthy in time"
    );
    server
}
