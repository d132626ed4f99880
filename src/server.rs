use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::RuntimeConfig;
use crate::context::ExecutionContext;
use crate::engine::ExecutionLogEntry;
use crate::orchestrator::Orchestrator;

pub struct ServerState {
    pub profile: String,
    pub default_goal: String,
    pub orchestrator: Orchestrator,
    /// One orchestration at a time per process.
    pub run_gate: Mutex<()>,
}

#[derive(Debug, Serialize)]
pub struct ServerHealthResponse {
    pub status: &'static str,
    pub profile: String,
    pub agents: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerRunRequest {
    pub goal: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ServerRunResponse {
    pub success: bool,
    pub context: ExecutionContext,
    pub log: Vec<ExecutionLogEntry>,
}

pub type ApiError = (StatusCode, Json<Value>);
pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub async fn handle_server_health(State(state): State<Arc<ServerState>>) -> Json<ServerHealthResponse> {
    Json(ServerHealthResponse {
        status: "ok",
        profile: state.profile.clone(),
        agents: state.orchestrator.registry().get_all_manifests().len(),
    })
}

pub async fn handle_server_run(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<ServerRunRequest>,
) -> ApiResult<ServerRunResponse> {
    let goal = request
        .goal
        .map(|goal| goal.trim().to_string())
        .filter(|goal| !goal.is_empty())
        .unwrap_or_else(|| state.default_goal.clone());

    let initial = match request.context {
        None | Some(Value::Null) => ExecutionContext::new(),
        Some(Value::Object(map)) => ExecutionContext::from_map(map),
        Some(_) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "'context' must be a JSON object when provided",
            ));
        }
    };

    let _gate = state.run_gate.lock().await;
    let report = state.orchestrator.run(&goal, initial).await;
    Ok(Json(ServerRunResponse {
        success: report.success,
        context: report.context,
        log: report.log,
    }))
}

pub fn build_server_router(state: Arc<ServerState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(handle_server_health))
        .route("/v1/run", post(handle_server_run))
        .with_state(state)
}

pub async fn run_server(cfg: RuntimeConfig, host: String, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid server bind address '{host}:{port}'"))?;
    let cancel = CancellationToken::new();
    let orchestrator = Orchestrator::from_config(&cfg, "serve", cancel.clone())?;
    let state = Arc::new(ServerState {
        profile: cfg.profile.clone(),
        default_goal: cfg.goal.clone(),
        orchestrator,
        run_gate: Mutex::new(()),
    });

    println!("Server mode listening on http://{addr} (health: /healthz, run: /v1/run)");
    tracing::info!(%addr, profile = %cfg.profile, "server started");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind server listener")?;
    axum::serve(listener, build_server_router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            cancel.cancel();
        })
        .await
        .context("server runtime failed")
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { println!("\nReceived Ctrl+C, shutting down gracefully..."); }
        _ = terminate => { println!("\nReceived SIGTERM, shutting down gracefully..."); }
    }
}
