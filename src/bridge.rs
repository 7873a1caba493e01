//! HTTP bridge wiring: router assembly, health reporting, and the
//! lifecycle supervisor's startup/shutdown sequence.

use crate::config::{ConfigRegistry, Settings};
use crate::engine::ExecutionEngine;
use crate::gc;
use crate::job::JobStore;
use crate::request_handler;
use crate::session_pool::{self, SessionPool};
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const GC_INTERVAL: Duration = Duration::from_secs(3600);
const LOOP_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const POOL_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Everything a request handler needs, constructed once at startup and
/// threaded through axum's `State` extractor.
pub struct AppState {
    pub config: Arc<ConfigRegistry>,
    pub engine: Arc<ExecutionEngine>,
    pub pool: Arc<SessionPool>,
    pub jobs: Arc<JobStore>,
    pub settings: Arc<Settings>,
    start_time: Instant,
    request_count: AtomicU64,
}

impl AppState {
    pub fn record_request(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: &'static str,
    uptime_seconds: u64,
    active_sessions: usize,
}

/// Builds the axum router for every bridge endpoint.
pub fn build_router(state: Arc<AppState>) -> Router {
    let files_root = state.jobs.jobs_root().to_path_buf();

    Router::new()
        .route("/", get(banner))
        .route("/health", get(health))
        .route("/mcp/{tag}", post(request_handler::raw_passthrough))
        .route(
            "/mcpo/{tag}",
            get(request_handler::openapi_spec).post(request_handler::mcpo_legacy),
        )
        .route(
            "/mcpo/{tag}/openapi.json",
            get(request_handler::openapi_spec),
        )
        .route(
            "/mcpo/{tag}/{tool}",
            post(request_handler::tool_call),
        )
        .nest_service("/files", ServeDir::new(files_root))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn banner() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "mcpo-bridge",
        "version": VERSION,
        "status": "running",
    }))
}

/// Reports liveness and, opportunistically, triggers a non-blocking GC
/// sweep.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let jobs = state.jobs.clone();
    let file_expiry = Duration::from_secs(state.settings.file_expiry_secs);
    tokio::spawn(async move {
        gc::sweep(&jobs, file_expiry);
    });

    let active_sessions = state.pool.session_count();
    let degraded_at = (state.settings.stateful_max_total_processes as f64 * 0.9) as usize;
    let status = if state.settings.stateful_enabled && active_sessions >= degraded_at {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        timestamp: chrono::Utc::now(),
        version: VERSION,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        active_sessions,
    })
}

/// Startup sequence: load config, ensure the jobs root exists, run one
/// synchronous GC pass, then start the GC loop and (if enabled) the idle
/// reaper loop before serving traffic. Runs until a shutdown signal fires,
/// then executes the bounded shutdown sequence.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let config = Arc::new(ConfigRegistry::load(&settings.config_file)?);
    let jobs = Arc::new(JobStore::new(settings.jobs_dir.clone())?);
    crate::rewriter::set_jobs_root_prefix(&settings.jobs_dir.to_string_lossy());

    info!(jobs_dir = %settings.jobs_dir.display(), "running initial garbage collection pass");
    gc::sweep(&jobs, Duration::from_secs(settings.file_expiry_secs));

    let pool = Arc::new(SessionPool::new(settings.stateful_max_total_processes));
    let engine = Arc::new(ExecutionEngine::new(
        config.clone(),
        pool.clone(),
        settings.max_concurrent,
        settings.stateful_enabled,
        Duration::from_secs(settings.timeout_secs),
    ));
    let settings = Arc::new(settings);

    let state = Arc::new(AppState {
        config,
        engine,
        pool: pool.clone(),
        jobs: jobs.clone(),
        settings: settings.clone(),
        start_time: Instant::now(),
        request_count: AtomicU64::new(0),
    });

    let gc_handle = tokio::spawn(gc::run_loop(
        jobs.clone(),
        GC_INTERVAL,
        Duration::from_secs(settings.file_expiry_secs),
    ));
    let reaper_handle = if settings.stateful_enabled {
        Some(tokio::spawn(session_pool::run_idle_reaper(
            pool.clone(),
            Duration::from_secs(settings.stateful_cleanup_interval_secs),
        )))
    } else {
        None
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;
    info!(bind_addr = %settings.bind_addr, "mcpo-bridge listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("shutdown signal received, stopping background loops");
    gc_handle.abort();
    if let Some(handle) = reaper_handle {
        handle.abort();
    }
    tokio::time::sleep(LOOP_SHUTDOWN_GRACE).await;

    pool.shutdown(POOL_SHUTDOWN_GRACE).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerMode;
    use std::io::Write;

    fn state_with_server(tag: &str, mode: ServerMode) -> Arc<AppState> {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let mode_str = if mode == ServerMode::Persistent { "stateful" } else { "ephemeral" };
        write!(
            f,
            r#"{{ "mcpServers": {{ "{tag}": {{ "command": "/bin/cat", "mode": "{mode_str}" }} }} }}"#
        )
        .unwrap();
        let config = Arc::new(ConfigRegistry::load(f.path()).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let jobs = Arc::new(JobStore::new(dir.path().join("jobs")).unwrap());
        let pool = Arc::new(SessionPool::new(100));
        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            pool.clone(),
            16,
            true,
            Duration::from_secs(5),
        ));
        let settings = Arc::new(Settings {
            base_url: "http://base".into(),
            config_file: f.path().to_path_buf(),
            jobs_dir: dir.path().join("jobs"),
            log_level: "info".into(),
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            max_concurrent: 16,
            timeout_secs: 5,
            file_expiry_secs: 3600,
            stateful_enabled: true,
            stateful_default_idle_timeout: 1800,
            stateful_max_processes_per_ip: 1,
            stateful_max_total_processes: 100,
            stateful_cleanup_interval_secs: 300,
            enable_forward_user_info_headers: true,
        });
        Arc::new(AppState {
            config,
            engine,
            pool,
            jobs,
            settings,
            start_time: Instant::now(),
            request_count: AtomicU64::new(0),
        })
    }

    #[tokio::test]
    async fn health_reports_ok_when_under_degraded_threshold() {
        let state = state_with_server("echo", ServerMode::Ephemeral);
        let response = health(State(state)).await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn banner_reports_service_name() {
        let response = banner().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
