//! Full-stack system tests (spec.md §8's S1/S3/S4/S5/S6 scenarios): a real
//! `sandboxd` HTTP/WebSocket server bound to a loopback port, talking to a
//! hand-rolled fake in-container agent server that honors the agent-side
//! HTTP contract (spec.md §6). `MockDriver` stands in for the Docker
//! backend so no container runtime is required to run these tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use futures_util::StreamExt;
use sandboxd_api::{AppState, SandboxdServer, ServerConfig};
use sandboxd_driver::{ContainerHandle, MockDriver};
use sandboxd_runtime::{Dispatcher, Hub, Registry, Sandbox, SandboxManager, SandboxState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Spins up a real `sandboxd` server on a loopback port and returns its base
/// address plus handles to the registry and dispatcher so tests can seed
/// sandboxes directly (bypassing `SandboxManager::create`'s container
/// provisioning, which these tests don't need).
async fn spawn_runtime() -> (SocketAddr, Arc<Registry>, Arc<Dispatcher>, Arc<SandboxManager>) {
    let driver = Arc::new(MockDriver::new());
    let registry = Arc::new(Registry::new());
    let hub = Arc::new(Hub::new(registry.clone(), Default::default()));
    let manager = Arc::new(
        SandboxManager::new(driver, registry.clone(), Default::default(), 8080).with_hub(hub.clone()),
    );
    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), hub));

    let state = Arc::new(AppState {
        manager: manager.clone(),
        dispatcher: dispatcher.clone(),
        registry: registry.clone(),
        metrics_handle: None,
        hub_config: Default::default(),
    });

    let server = SandboxdServer::new(
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            enable_cors: true,
        },
        state,
    );
    let router = server.build_router();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, registry, dispatcher, manager)
}

/// A minimal stand-in for the in-container agent (spec.md §6's "Agent-side
/// HTTP contract"): acknowledges the action POST immediately, then posts
/// the `stream`/`result` observations back to the runtime's ingress
/// endpoint on a short delay so tests can interleave other operations
/// (e.g. a `Delete`) between acceptance and completion.
async fn spawn_fake_agent(ingress_base: String, behavior: AgentBehavior) -> SocketAddr {
    #[derive(Clone)]
    struct AgentState {
        ingress_base: String,
        behavior: AgentBehavior,
    }

    async fn handle(
        State(state): State<AgentState>,
        Json(body): Json<Value>,
    ) -> axum::http::StatusCode {
        let action_id = body["action_id"].as_str().unwrap().to_string();
        let ingress_base = state.ingress_base.clone();

        match state.behavior {
            AgentBehavior::Succeed { delay } => {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let client = reqwest::Client::new();
                    let _ = client
                        .post(&ingress_base)
                        .json(&json!({"type": "stream", "action_id": action_id, "stream": "stdout", "line": "hi\n"}))
                        .send()
                        .await;
                    let _ = client
                        .post(&ingress_base)
                        .json(&json!({"type": "result", "action_id": action_id, "exit_code": 0}))
                        .send()
                        .await;
                });
                axum::http::StatusCode::OK
            }
            AgentBehavior::Reject => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    let state = AgentState { ingress_base, behavior };
    let router = Router::new()
        .route("/tools:run_shell_command", post(handle))
        .route("/tools:run_ipython_cell", post(handle))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

#[derive(Clone, Copy)]
enum AgentBehavior {
    Succeed { delay: Duration },
    Reject,
}

async fn seed_sandbox(registry: &Registry, id: &str, agent_endpoint: String) {
    registry
        .insert(Sandbox {
            id: id.to_string(),
            container_handle: ContainerHandle(format!("mock-{id}")),
            agent_endpoint,
            state: SandboxState::Running,
            image_ref: "sandboxd/agent:latest".into(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn connect_stream(
    addr: SocketAddr,
    sandbox_id: &str,
) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let url = format!("ws://{addr}/v1/sandboxes/{sandbox_id}/stream");
    let (stream, _response) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

async fn next_frame(
    stream: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended unexpectedly")
            .unwrap();
        if let Message::Binary(bytes) = msg {
            return serde_json::from_slice(&bytes).unwrap();
        }
        // Ignore any control frames (ping/close handshakes) on the way.
    }
}

// ============================================================================
// S1 — happy path, verified against two independent subscribers (S5).
// ============================================================================

#[tokio::test]
async fn happy_path_delivers_start_stream_result_end_to_every_subscriber() {
    let (addr, registry, _dispatcher, _manager) = spawn_runtime().await;

    let agent_addr = spawn_fake_agent(
        format!("http://{addr}/internal/observations/s1"),
        AgentBehavior::Succeed { delay: Duration::from_millis(10) },
    )
    .await;
    seed_sandbox(&registry, "s1", format!("http://{agent_addr}")).await;

    let mut sub_a = connect_stream(addr, "s1").await;
    let mut sub_b = connect_stream(addr, "s1").await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/v1/sandboxes/s1/shell"))
        .json(&json!({"command": "echo hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let action_id = response.json::<Value>().await.unwrap()["action_id"]
        .as_str()
        .unwrap()
        .to_string();

    for sub in [&mut sub_a, &mut sub_b] {
        let start = next_frame(sub).await;
        assert_eq!(start["type"], "start");
        assert_eq!(start["action_id"], action_id);

        let stream = next_frame(sub).await;
        assert_eq!(stream["type"], "stream");
        assert_eq!(stream["line"], "hi\n");

        let result = next_frame(sub).await;
        assert_eq!(result["type"], "result");
        assert_eq!(result["exit_code"], 0);

        let end = next_frame(sub).await;
        assert_eq!(end["type"], "end");
        assert_eq!(end["exit_code"], 0);
        assert_eq!(end["action_id"], action_id);
    }
}

// ============================================================================
// S2 — agent HTTP failure surfaces as error + end, no stream/result.
// ============================================================================

#[tokio::test]
async fn agent_rejection_surfaces_as_error_then_end() {
    let (addr, registry, _dispatcher, _manager) = spawn_runtime().await;

    let agent_addr = spawn_fake_agent(
        format!("http://{addr}/internal/observations/s2"),
        AgentBehavior::Reject,
    )
    .await;
    seed_sandbox(&registry, "s2", format!("http://{agent_addr}")).await;

    let mut sub = connect_stream(addr, "s2").await;

    let client = reqwest::Client::new();
    client
        .post(format!("http://{addr}/v1/sandboxes/s2/shell"))
        .json(&json!({"command": "echo hi"}))
        .send()
        .await
        .unwrap();

    let start = next_frame(&mut sub).await;
    assert_eq!(start["type"], "start");

    let error = next_frame(&mut sub).await;
    assert_eq!(error["type"], "error");

    let end = next_frame(&mut sub).await;
    assert_eq!(end["type"], "end");
    assert_eq!(end["exit_code"], -1);
}

// ============================================================================
// S3 — deleting the sandbox mid-action discards the agent's late pushback
// and closes the subscriber socket.
// ============================================================================

#[tokio::test]
async fn delete_during_action_closes_stream_and_discards_late_observations() {
    let (addr, registry, _dispatcher, manager) = spawn_runtime().await;

    let agent_addr = spawn_fake_agent(
        format!("http://{addr}/internal/observations/s3"),
        AgentBehavior::Succeed { delay: Duration::from_millis(300) },
    )
    .await;
    seed_sandbox(&registry, "s3", format!("http://{agent_addr}")).await;

    let mut sub = connect_stream(addr, "s3").await;

    let client = reqwest::Client::new();
    client
        .post(format!("http://{addr}/v1/sandboxes/s3/shell"))
        .json(&json!({"command": "sleep 1"}))
        .send()
        .await
        .unwrap();

    let start = next_frame(&mut sub).await;
    assert_eq!(start["type"], "start");

    // Delete well before the fake agent's delayed pushback lands.
    manager.delete("s3").await.unwrap();
    assert!(!registry.exists("s3").await);

    // The socket is closed by the Hub's teardown; no stream/result/end ever
    // arrives because the agent's later POSTs to the ingress endpoint are
    // silently discarded once the sandbox is gone (spec.md §4.5 step 1).
    let closed = tokio::time::timeout(Duration::from_secs(2), sub.next()).await;
    match closed {
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {}
        Ok(Some(Ok(other))) => panic!("expected socket close, got another frame: {other:?}"),
        Ok(Some(Err(_))) => {}
        Err(_) => panic!("socket was not closed within the timeout"),
    }
}

// ============================================================================
// S4 — subscribing to an unknown sandbox is rejected before upgrade.
// ============================================================================

#[tokio::test]
async fn unknown_sandbox_stream_subscription_is_rejected() {
    let (addr, _registry, _dispatcher, _manager) = spawn_runtime().await;

    let url = format!("ws://{addr}/v1/sandboxes/ghost/stream");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected an HTTP-level rejection, got {other:?}"),
    }
}

// ============================================================================
// S6 — malformed ingress is rejected without disturbing the service.
// ============================================================================

#[tokio::test]
async fn malformed_ingress_is_rejected_and_service_stays_healthy() {
    let (addr, registry, _dispatcher, _manager) = spawn_runtime().await;
    seed_sandbox(&registry, "s6", "http://127.0.0.1:1".into()).await;

    let client = reqwest::Client::new();

    let bad = client
        .post(format!("http://{addr}/internal/observations/s6"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), 400);

    let healthy = client
        .get(format!("http://{addr}/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(healthy.status(), 200);

    let good = client
        .post(format!("http://{addr}/internal/observations/s6"))
        .json(&json!({"type": "stream", "action_id": "a1", "stream": "stdout", "line": "ok\n"}))
        .send()
        .await
        .unwrap();
    assert_eq!(good.status(), 200);
}
