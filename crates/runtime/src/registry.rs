//! The Sandbox Registry: the single authoritative, concurrency-safe map
//! from sandbox id to state (spec.md §4.2).

use std::collections::HashMap;

use async_trait::async_trait;
use sandboxd_core::{Error, Result};
use tokio::sync::RwLock;

use crate::models::{Sandbox, SandboxState};

/// A narrow capability exposing only existence checks. The Hub is built
/// against this trait rather than the concrete `Registry` (or the Manager)
/// so that Hub ↔ Manager never form a cyclic dependency — both depend on
/// this capability, not on each other (spec.md §9, "cyclic reference").
#[async_trait]
pub trait SandboxExistence: Send + Sync {
    async fn exists(&self, sandbox_id: &str) -> bool;
}

/// In-memory sandbox registry. All mutation happens under the exclusive
/// lock; reads take the shared lock. Callers must never perform blocking or
/// network I/O while holding either guard — the Manager takes care to run
/// Driver calls outside of any lock it holds here.
#[derive(Default)]
pub struct Registry {
    sandboxes: RwLock<HashMap<String, Sandbox>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new sandbox record. Fails with `AlreadyExists` if the id is
    /// already present.
    pub async fn insert(&self, sandbox: Sandbox) -> Result<()> {
        let mut sandboxes = self.sandboxes.write().await;
        if sandboxes.contains_key(&sandbox.id) {
            return Err(Error::already_exists(sandbox.id.clone()));
        }
        sandboxes.insert(sandbox.id.clone(), sandbox);
        Ok(())
    }

    /// Fetch a snapshot of a sandbox's current record.
    pub async fn get(&self, sandbox_id: &str) -> Option<Sandbox> {
        self.sandboxes.read().await.get(sandbox_id).cloned()
    }

    pub async fn exists(&self, sandbox_id: &str) -> bool {
        self.sandboxes.read().await.contains_key(sandbox_id)
    }

    /// Transition a sandbox to `Terminating`. Returns `NotFound` if it is
    /// already gone.
    pub async fn mark_terminating(&self, sandbox_id: &str) -> Result<Sandbox> {
        let mut sandboxes = self.sandboxes.write().await;
        let sandbox = sandboxes
            .get_mut(sandbox_id)
            .ok_or_else(|| Error::not_found(sandbox_id.to_string()))?;
        sandbox.state = SandboxState::Terminating;
        Ok(sandbox.clone())
    }

    /// Remove a sandbox's entry entirely, returning the last known record if
    /// it existed.
    pub async fn remove(&self, sandbox_id: &str) -> Option<Sandbox> {
        self.sandboxes.write().await.remove(sandbox_id)
    }

    /// Snapshot of every sandbox currently tracked, for introspection.
    pub async fn list(&self) -> Vec<Sandbox> {
        self.sandboxes.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl SandboxExistence for Registry {
    async fn exists(&self, sandbox_id: &str) -> bool {
        Registry::exists(self, sandbox_id).await
    }
}
