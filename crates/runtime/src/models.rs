//! Shared data model for the Sandbox Registry, Manager, Hub, and Dispatcher.

use chrono::{DateTime, Utc};
use sandboxd_driver::ContainerHandle;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a sandbox, as tracked by the Registry.
///
/// Externally this only ever shows up as "exists and running" or "does not
/// exist" — `Provisioning` and `Terminating` are internal to a single
/// Manager call and are never observed by a concurrent reader because the
/// Registry only gains an entry once it reaches `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Provisioning,
    Running,
    Terminating,
    Terminated,
}

/// A single sandbox's authoritative record.
#[derive(Debug, Clone, Serialize)]
pub struct Sandbox {
    pub id: String,
    #[serde(skip)]
    pub container_handle: ContainerHandle,
    pub agent_endpoint: String,
    pub state: SandboxState,
    pub image_ref: String,
    pub created_at: DateTime<Utc>,
}

/// The kind of action a client can dispatch into a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Shell,
    IPython,
}

impl ActionKind {
    /// The path on the in-container agent this action kind is posted to.
    pub fn agent_path(self) -> &'static str {
        match self {
            ActionKind::Shell => "/tools:run_shell_command",
            ActionKind::IPython => "/tools:run_ipython_cell",
        }
    }
}

/// A synthesized `start`, `error`, or `end` observation frame on the wire
/// schema. Agent-emitted frames are relayed byte-for-byte and never pass
/// through this type.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationFrame {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub action_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ObservationFrame {
    pub fn start(action_id: impl Into<String>) -> Self {
        Self {
            kind: "start",
            action_id: action_id.into(),
            exit_code: None,
            error: None,
        }
    }

    pub fn end(action_id: impl Into<String>, exit_code: i64, error: Option<String>) -> Self {
        Self {
            kind: "end",
            action_id: action_id.into(),
            exit_code: Some(exit_code),
            error,
        }
    }

    pub fn error(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: "error",
            action_id: action_id.into(),
            exit_code: None,
            error: Some(message.into()),
        }
    }

    /// Serialize to the exact bytes published to subscribers.
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ObservationFrame always serializes")
    }
}
