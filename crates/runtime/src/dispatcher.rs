//! The Action Dispatcher (spec.md §4.5): turns a synchronous client request
//! into an action id plus a stream of observations, bridging to the
//! in-container agent over HTTP.

use std::sync::Arc;

use sandboxd_core::{AuditEvent, Error, EventEmitter, EventType, NoOpEventEmitter, Result};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::hub::Hub;
use crate::models::{ActionKind, ObservationFrame, SandboxState};
use crate::registry::Registry;

/// Dispatches shell/ipython actions to the agent and relays the agent's
/// pushed-back observations through the Hub.
pub struct Dispatcher {
    registry: Arc<Registry>,
    hub: Arc<Hub>,
    http: reqwest::Client,
    events: Arc<dyn EventEmitter>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, hub: Arc<Hub>) -> Self {
        Self {
            registry,
            hub,
            http: reqwest::Client::new(),
            events: Arc::new(NoOpEventEmitter),
        }
    }

    pub fn with_event_emitter(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    /// Accept an action for dispatch. Mints an `action_id`, synthesizes the
    /// `start` observation, and launches the agent POST in the background —
    /// the call returns as soon as the id is minted, not once the agent has
    /// replied (spec.md §4.5).
    pub async fn initiate(&self, sandbox_id: &str, kind: ActionKind, payload: Value) -> Result<String> {
        let sandbox = self
            .registry
            .get(sandbox_id)
            .await
            .ok_or_else(|| Error::not_found(sandbox_id.to_string()))?;

        if sandbox.state != SandboxState::Running {
            return Err(Error::not_found(sandbox_id.to_string()));
        }

        let action_id = Uuid::new_v4().to_string();

        let mut body = match payload {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        body.insert("action_id".to_string(), Value::String(action_id.clone()));

        self.hub
            .publish(sandbox_id, ObservationFrame::start(&action_id).to_bytes())
            .await;

        let url = format!("{}{}", sandbox.agent_endpoint, kind.agent_path());
        let hub = self.hub.clone();
        let events = self.events.clone();
        let sandbox_id = sandbox_id.to_string();
        let action_id_for_task = action_id.clone();
        let http = self.http.clone();

        tokio::spawn(async move {
            let result = http.post(&url).json(&Value::Object(body)).send().await;

            match result {
                Ok(response) if response.status().is_success() => {
                    // The agent acknowledged; it now owns pushing observations
                    // to the ingress endpoint. Nothing further to do here.
                }
                Ok(response) => {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    tracing::warn!(sandbox_id = %sandbox_id, action_id = %action_id_for_task, %status, "agent rejected action");
                    Self::publish_failure(
                        &hub,
                        &events,
                        &sandbox_id,
                        &action_id_for_task,
                        format!("agent responded with status {status}: {text}"),
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(sandbox_id = %sandbox_id, action_id = %action_id_for_task, error = %e, "agent transport failure");
                    Self::publish_failure(
                        &hub,
                        &events,
                        &sandbox_id,
                        &action_id_for_task,
                        format!("transport error: {e}"),
                    )
                    .await;
                }
            }
        });

        tracing::info!(sandbox_id = %sandbox.id, action_id = %action_id, "action initiated");
        metrics::counter!("sandboxd_actions_initiated_total").increment(1);
        self.events
            .emit(
                AuditEvent::new(EventType::ActionInitiated, serde_json::json!({"kind": kind.agent_path()}))
                    .with_sandbox(&sandbox.id)
                    .with_action(&action_id),
            )
            .await;

        Ok(action_id)
    }

    async fn publish_failure(
        hub: &Hub,
        events: &Arc<dyn EventEmitter>,
        sandbox_id: &str,
        action_id: &str,
        message: String,
    ) {
        hub.publish(sandbox_id, ObservationFrame::error(action_id, message.clone()).to_bytes())
            .await;
        hub.publish(
            sandbox_id,
            ObservationFrame::end(action_id, -1, Some(message.clone())).to_bytes(),
        )
        .await;
        events
            .emit(
                AuditEvent::new(EventType::ActionSettled, serde_json::json!({"exit_code": -1, "error": message}))
                    .with_sandbox(sandbox_id)
                    .with_action(action_id)
                    .with_severity(sandboxd_core::EventSeverity::Warning),
            )
            .await;
    }

    /// Accept an observation posted by the in-container agent
    /// (spec.md §4.5's `IngestObservation`).
    pub async fn ingest_observation(&self, sandbox_id: &str, raw_bytes: &[u8]) -> Result<()> {
        if !self.registry.exists(sandbox_id).await {
            // The agent may be racing with deletion; discard quietly.
            return Ok(());
        }

        let value: Value = serde_json::from_slice(raw_bytes)
            .map_err(|e| Error::ObservationParse(e.to_string()))?;

        let Some(action_id) = value.get("action_id").and_then(Value::as_str) else {
            tracing::warn!(sandbox_id, "observation missing action_id, discarding");
            return Ok(());
        };

        self.hub.publish(sandbox_id, raw_bytes.to_vec()).await;

        if value.get("type").and_then(Value::as_str) == Some("result") {
            let exit_code = value.get("exit_code").and_then(Value::as_i64).unwrap_or(-1);
            let error = value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string);

            self.hub
                .publish(
                    sandbox_id,
                    ObservationFrame::end(action_id, exit_code, error).to_bytes(),
                )
                .await;

            tracing::info!(sandbox_id, action_id, exit_code, "action settled");
            self.events
                .emit(
                    AuditEvent::new(EventType::ActionSettled, serde_json::json!({"exit_code": exit_code}))
                        .with_sandbox(sandbox_id)
                        .with_action(action_id),
                )
                .await;
        }

        Ok(())
    }

    /// Pull-through so callers (the HTTP layer) can offer a consistent
    /// error for unknown sandboxes without importing the Registry directly.
    pub async fn sandbox_exists(&self, sandbox_id: &str) -> bool {
        self.registry.exists(sandbox_id).await
    }

    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }
}
