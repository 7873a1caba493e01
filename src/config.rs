//! Config Registry and process-wide settings.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// Execution mode for a configured server type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    Ephemeral,
    #[serde(rename = "stateful")]
    Persistent,
}

impl Default for ServerMode {
    fn default() -> Self {
        ServerMode::Ephemeral
    }
}

fn default_file_path_fields() -> HashSet<String> {
    ["file_path".to_string()].into_iter().collect()
}

/// One entry of `mcp-servers.json`'s `mcpServers` map.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    #[serde(skip)]
    pub tag: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_max_sessions_per_key", rename = "max_processes_per_ip")]
    pub max_sessions_per_key: usize,
    #[serde(default = "default_file_path_fields")]
    pub file_path_fields: HashSet<String>,
    #[serde(default)]
    pub usage_guide: Option<String>,
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_max_sessions_per_key() -> usize {
    1
}

impl ServerSpec {
    pub fn is_persistent(&self) -> bool {
        self.mode == ServerMode::Persistent
    }
}

#[derive(Debug, Deserialize)]
struct RawConfigFile {
    #[serde(rename = "mcpServers")]
    mcp_servers: HashMap<String, ServerSpec>,
}

/// Immutable, loaded-once lookup table keyed by server-tag.
///
/// Never mutates after construction; `Arc<ConfigRegistry>` is threaded
/// through the rest of the bridge.
#[derive(Debug)]
pub struct ConfigRegistry {
    servers: HashMap<String, ServerSpec>,
}

impl ConfigRegistry {
    /// Loads the registry from a JSON file containing a top-level
    /// `mcpServers` mapping. Loading is fatal on a missing file or a
    /// missing `mcpServers` key.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("config file not found: {}: {}", path.display(), e))?;
        let mut raw: RawConfigFile = serde_json::from_str(&text)
            .map_err(|e| anyhow::anyhow!("invalid config file {}: {}", path.display(), e))?;
        for (tag, spec) in raw.mcp_servers.iter_mut() {
            spec.tag = tag.clone();
        }
        Ok(Self {
            servers: raw.mcp_servers,
        })
    }

    pub fn get(&self, tag: &str) -> Option<&ServerSpec> {
        self.servers.get(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(|s| s.as_str())
    }
}

/// Process-wide settings, loaded once from CLI flags / `MCPO_*` env vars.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "mcpo-bridge", about = "HTTP bridge to stdio MCP tool programs")]
pub struct Settings {
    #[arg(long, env = "MCPO_BASE_URL", default_value = "http://localhost:8080")]
    pub base_url: String,

    #[arg(long, env = "MCPO_CONFIG_FILE", default_value = "mcp-servers.json")]
    pub config_file: PathBuf,

    #[arg(long, env = "MCPO_JOBS_DIR", default_value = "/tmp/mcpo-jobs")]
    pub jobs_dir: PathBuf,

    #[arg(long, env = "MCPO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "MCPO_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: std::net::SocketAddr,

    #[arg(long, env = "MCPO_MAX_CONCURRENT", default_value_t = 16)]
    pub max_concurrent: usize,

    #[arg(long, env = "MCPO_TIMEOUT", default_value_t = 300)]
    pub timeout_secs: u64,

    #[arg(long, env = "MCPO_FILE_EXPIRY", default_value_t = 3600)]
    pub file_expiry_secs: u64,

    #[arg(long, env = "MCPO_STATEFUL_ENABLED", default_value_t = true)]
    pub stateful_enabled: bool,

    #[arg(long, env = "MCPO_STATEFUL_DEFAULT_IDLE_TIMEOUT", default_value_t = 1800)]
    pub stateful_default_idle_timeout: u64,

    #[arg(long, env = "MCPO_STATEFUL_MAX_PROCESSES_PER_IP", default_value_t = 1)]
    pub stateful_max_processes_per_ip: usize,

    #[arg(long, env = "MCPO_STATEFUL_MAX_TOTAL_PROCESSES", default_value_t = 100)]
    pub stateful_max_total_processes: usize,

    #[arg(long, env = "MCPO_STATEFUL_CLEANUP_INTERVAL", default_value_t = 300)]
    pub stateful_cleanup_interval_secs: u64,

    #[arg(long, env = "MCPO_ENABLE_FORWARD_USER_INFO_HEADERS", default_value_t = true)]
    pub enable_forward_user_info_headers: bool,
}
