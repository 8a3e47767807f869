//! Axum-based HTTP/WebSocket surface for the sandbox runtime.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use sandboxd_core::config::HubConfig;
use sandboxd_core::Result;
use sandboxd_runtime::{ActionKind, Dispatcher, Registry, SandboxManager};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

/// Everything a handler needs: the Manager for lifecycle calls, the
/// Dispatcher for actions and observation ingress, and the Registry for
/// read-only introspection. All three are cheap `Arc` clones sharing the
/// same underlying state.
pub struct AppState {
    pub manager: Arc<SandboxManager>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<Registry>,
    pub metrics_handle: Option<PrometheusHandle>,
    pub hub_config: HubConfig,
}

/// Top-level server configuration (listen address and ambient toggles).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

pub struct SandboxdServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl SandboxdServer {
    pub fn new(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn build_router(&self) -> Router {
        let public = Router::new()
            .route("/v1/sandboxes", post(create_sandbox_handler).get(list_sandboxes_handler))
            .route(
                "/v1/sandboxes/{id}",
                get(get_sandbox_handler).delete(delete_sandbox_handler),
            )
            .route("/v1/sandboxes/{id}/shell", post(shell_handler))
            .route("/v1/sandboxes/{id}/ipython", post(ipython_handler))
            .route("/v1/sandboxes/{id}/stream", get(stream_handler));

        let internal =
            Router::new().route("/internal/observations/{sandbox_id}", post(ingest_handler));

        let metrics_handle = self.state.metrics_handle.clone();
        let system = Router::new()
            .route("/healthz", get(healthz_handler))
            .route(
                "/metrics",
                get(move || {
                    let handle = metrics_handle.clone();
                    async move {
                        match handle {
                            Some(h) => h.render(),
                            None => "metrics not enabled".to_string(),
                        }
                    }
                }),
            );

        let mut router = Router::new()
            .merge(public)
            .merge(internal)
            .merge(system)
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::new().allow_origin(Any).allow_methods(Any));
        }

        router
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        tracing::info!(%addr, "sandboxd listening");

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| sandboxd_core::Error::internal(format!("bind failed: {e}")))?;

        axum::serve(listener, self.build_router())
            .await
            .map_err(|e| sandboxd_core::Error::internal(format!("server error: {e}")))?;

        Ok(())
    }
}

// ============================================================================
// Request/response bodies
// ============================================================================

#[derive(Serialize)]
struct CreateSandboxResponse {
    sandbox_id: String,
    agent_url: String,
}

#[derive(Deserialize)]
struct ShellRequest {
    command: String,
}

#[derive(Deserialize)]
struct IPythonRequest {
    code: String,
    #[serde(default)]
    split_output: Option<bool>,
}

#[derive(Serialize)]
struct ActionResponse {
    action_id: String,
}

#[derive(Serialize)]
struct SandboxSummary {
    id: String,
    state: sandboxd_runtime::SandboxState,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_sandbox_handler(
    State(state): State<Arc<AppState>>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let sandbox_id = state.manager.create().await?;
    let sandbox = state
        .registry
        .get(&sandbox_id)
        .await
        .ok_or_else(|| sandboxd_core::Error::internal("sandbox vanished immediately after creation"))?;

    Ok(Json(CreateSandboxResponse {
        sandbox_id,
        agent_url: sandbox.agent_endpoint,
    }))
}

async fn delete_sandbox_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state.manager.delete(&id).await?;
    Ok(StatusCode::OK)
}

async fn list_sandboxes_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sandboxes: Vec<SandboxSummary> = state
        .registry
        .list()
        .await
        .into_iter()
        .map(|s| SandboxSummary { id: s.id, state: s.state })
        .collect();
    Json(sandboxes)
}

async fn get_sandbox_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let sandbox = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| sandboxd_core::Error::not_found(id.clone()))?;

    Ok(Json(SandboxSummary {
        id: sandbox.id,
        state: sandbox.state,
    }))
}

async fn shell_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ShellRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let action_id = state
        .dispatcher
        .initiate(&id, ActionKind::Shell, serde_json::json!({ "command": req.command }))
        .await?;
    Ok(Json(ActionResponse { action_id }))
}

async fn ipython_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<IPythonRequest>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let mut payload = serde_json::json!({ "code": req.code });
    if let Some(split_output) = req.split_output {
        payload["split_output"] = serde_json::Value::Bool(split_output);
    }

    let action_id = state
        .dispatcher
        .initiate(&id, ActionKind::IPython, payload)
        .await?;
    Ok(Json(ActionResponse { action_id }))
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Path(sandbox_id): Path<String>,
    body: axum::body::Bytes,
) -> std::result::Result<StatusCode, ApiError> {
    state.dispatcher.ingest_observation(&sandbox_id, &body).await?;
    Ok(StatusCode::OK)
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> std::result::Result<impl IntoResponse, ApiError> {
    if !state.manager.exists(&id).await {
        return Err(ApiError::from(sandboxd_core::Error::not_found(id)));
    }

    Ok(ws.on_upgrade(move |socket| handle_stream(state, id, socket)))
}

async fn handle_stream(state: Arc<AppState>, sandbox_id: String, mut socket: WebSocket) {
    let mut frames = match state.dispatcher.hub().subscribe(&sandbox_id).await {
        Ok(rx) => rx,
        Err(e) => {
            let _ = socket
                .send(Message::Text(
                    serde_json::json!({"error": e.to_string()}).to_string().into(),
                ))
                .await;
            return;
        }
    };

    let heartbeat_interval = Duration::from_secs(state.hub_config.heartbeat_interval_secs);
    let pong_timeout = Duration::from_secs(state.hub_config.pong_timeout_secs);
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            frame = frames.recv() => {
                match frame {
                    Some(bytes) => {
                        if socket.send(Message::Binary(bytes.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break, // sandbox torn down
                }
            }
            _ = heartbeat.tick() => {
                if awaiting_pong {
                    tracing::warn!(sandbox_id = %sandbox_id, "subscriber missed pong, dropping");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }
            incoming = tokio::time::timeout(pong_timeout, socket.recv()) => {
                match incoming {
                    Ok(Some(Ok(Message::Pong(_)))) => {
                        awaiting_pong = false;
                    }
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Err(_))) => break,
                    Ok(Some(Ok(_))) => {}
                    Err(_) => {
                        tracing::warn!(sandbox_id = %sandbox_id, "subscriber read timed out, dropping");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(sandbox_id = %sandbox_id, "stream subscriber disconnected");
}
