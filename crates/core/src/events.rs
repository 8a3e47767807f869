//! Structured audit events for the sandbox runtime.
//!
//! Mirrors the event-envelope pattern used across the reference workspace
//! this crate grew out of, trimmed to the lifecycle events a sandbox
//! control plane actually emits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single structured audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id.
    pub id: String,
    /// Sandbox the event concerns, if any.
    pub sandbox_id: Option<String>,
    /// Action the event concerns, if any.
    pub action_id: Option<String>,
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// Event category.
    pub event_type: EventType,
    /// Severity level.
    pub severity: EventSeverity,
    /// Structured, event-specific payload.
    pub payload: serde_json::Value,
}

impl AuditEvent {
    pub fn new(event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sandbox_id: None,
            action_id: None,
            timestamp: Utc::now(),
            event_type,
            severity: EventSeverity::Info,
            payload,
        }
    }

    pub fn with_sandbox(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn with_severity(mut self, severity: EventSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A sandbox finished provisioning and reached `Running`.
    SandboxCreated,
    /// A sandbox's teardown completed (or was definitively lost).
    SandboxRemoved,
    /// An action was accepted and dispatched to the agent.
    ActionInitiated,
    /// An action reached its terminal `end` observation.
    ActionSettled,
    /// An observation frame was dropped (full queue, unknown sandbox, parse error).
    ObservationDropped,
    /// A subscriber socket was dropped (slow consumer, ping/pong timeout).
    SubscriberDropped,
    /// Anything not covered above.
    Other(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}
