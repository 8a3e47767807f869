//! The Sandbox Manager: owns sandbox lifecycle, orchestrating the Container
//! Driver and the Registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sandboxd_core::{config::SandboxConfig, AuditEvent, Error, EventEmitter, NoOpEventEmitter, Result};
use sandboxd_driver::{select_address, ContainerDriver, CreateSpec};
use uuid::Uuid;

use crate::hub::Hub;
use crate::models::{Sandbox, SandboxState};
use crate::registry::Registry;

/// Port the sandbox image's agent listens on inside the container. Used
/// both as the port `Create` asks the Driver to expose and as the port the
/// resolved agent address is reached on.
const AGENT_PORT: u16 = 8088;

/// Orchestrates sandbox creation and teardown. Holds no lock of its own —
/// all mutable state lives in the `Registry`; the Manager's job is ordering
/// Driver calls around Registry commits so a crash or error never strands a
/// half-created container.
pub struct SandboxManager {
    driver: Arc<dyn ContainerDriver>,
    registry: Arc<Registry>,
    config: SandboxConfig,
    /// The service's own listen port, injected into each sandbox's
    /// environment as part of `RUNTIME_OBSERVATION_URL`.
    runtime_port: u16,
    events: Arc<dyn EventEmitter>,
    /// Notified on teardown so subscribers don't have to wait out a
    /// heartbeat timeout to learn their sandbox is gone. Manager -> Hub is
    /// one-directional; Hub only depends back on the narrow
    /// `SandboxExistence` capability, not on the Manager, so the two never
    /// cycle.
    hub: Option<Arc<Hub>>,
}

impl SandboxManager {
    pub fn new(
        driver: Arc<dyn ContainerDriver>,
        registry: Arc<Registry>,
        config: SandboxConfig,
        runtime_port: u16,
    ) -> Self {
        Self {
            driver,
            registry,
            config,
            runtime_port,
            events: Arc::new(NoOpEventEmitter),
            hub: None,
        }
    }

    pub fn with_event_emitter(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = events;
        self
    }

    pub fn with_hub(mut self, hub: Arc<Hub>) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Create and start a new sandbox, returning its id once the container
    /// is running and its agent endpoint has been resolved (spec.md §4.3).
    pub async fn create(&self) -> Result<String> {
        let sandbox_id = Uuid::new_v4().to_string();
        let image_ref = self.config.image.clone();

        self.with_timeout(self.config.pull_timeout_secs, "ensure_image", async {
            self.driver.ensure_image(&image_ref).await
        })
        .await?;

        let observation_url = format!(
            "http://{}:{}/internal/observations/{}",
            self.config.runtime_host, self.runtime_port, sandbox_id
        );

        let mut env = HashMap::new();
        env.insert("SANDBOX_ID".to_string(), sandbox_id.clone());
        env.insert("RUNTIME_OBSERVATION_URL".to_string(), observation_url);

        let mut labels = HashMap::new();
        labels.insert(self.config.label_scope.clone(), sandbox_id.clone());

        let spec = CreateSpec {
            image_ref: image_ref.clone(),
            env,
            labels,
            exposed_port: AGENT_PORT,
            name: format!("sandboxd-{sandbox_id}"),
        };

        let handle = self
            .with_timeout(self.config.create_timeout_secs, "create", async {
                self.driver.create(&spec).await
            })
            .await?;

        if let Err(e) = self
            .with_timeout(self.config.start_timeout_secs, "start", async {
                self.driver.start(&handle).await
            })
            .await
        {
            // Driver::start already makes a best-effort removal attempt on
            // failure; nothing was registered yet so there is nothing else
            // to roll back.
            return Err(e);
        }

        let info = match self
            .with_timeout(self.config.inspect_timeout_secs, "inspect", async {
                self.driver.inspect(&handle).await
            })
            .await
        {
            Ok(info) => info,
            Err(e) => {
                self.force_remove(&handle).await;
                return Err(e);
            }
        };

        let address = match select_address(&info.network_addresses) {
            Ok(address) => address,
            Err(e) => {
                self.force_remove(&handle).await;
                return Err(e);
            }
        };

        let sandbox = Sandbox {
            id: sandbox_id.clone(),
            container_handle: handle,
            agent_endpoint: format!("http://{address}:{AGENT_PORT}"),
            state: SandboxState::Running,
            image_ref,
            created_at: Utc::now(),
        };

        self.registry.insert(sandbox).await?;

        tracing::info!(sandbox_id = %sandbox_id, "sandbox created");
        metrics::gauge!("sandboxd_sandboxes_active").increment(1.0);
        self.events
            .emit(
                AuditEvent::new(sandboxd_core::EventType::SandboxCreated, serde_json::json!({}))
                    .with_sandbox(&sandbox_id),
            )
            .await;

        Ok(sandbox_id)
    }

    /// Tear down a sandbox: stop then remove the container, then clear the
    /// Registry entry. Idempotent failures in the backend are logged, not
    /// propagated — once `Delete` starts, the Registry entry is cleared
    /// regardless (spec.md §7, "Partial-failure semantics").
    pub async fn delete(&self, sandbox_id: &str) -> Result<()> {
        let sandbox = self.registry.mark_terminating(sandbox_id).await?;

        if let Err(e) = self
            .with_timeout(self.config.stop_timeout_secs, "stop", async {
                self.driver
                    .stop(&sandbox.container_handle, self.config.stop_grace_secs)
                    .await
            })
            .await
        {
            tracing::warn!(sandbox_id, error = %e, "stop failed, continuing with remove");
        }

        if let Err(e) = self
            .with_timeout(self.config.remove_timeout_secs, "remove", async {
                self.driver.remove(&sandbox.container_handle, true, true).await
            })
            .await
        {
            tracing::warn!(sandbox_id, error = %e, "remove failed, clearing registry entry anyway");
        }

        self.registry.remove(sandbox_id).await;

        if let Some(hub) = &self.hub {
            hub.teardown(sandbox_id).await;
        }

        tracing::info!(sandbox_id, "sandbox removed");
        metrics::gauge!("sandboxd_sandboxes_active").decrement(1.0);
        self.events
            .emit(
                AuditEvent::new(sandboxd_core::EventType::SandboxRemoved, serde_json::json!({}))
                    .with_sandbox(sandbox_id),
            )
            .await;

        Ok(())
    }

    pub async fn exists(&self, sandbox_id: &str) -> bool {
        self.registry.exists(sandbox_id).await
    }

    async fn force_remove(&self, handle: &sandboxd_driver::ContainerHandle) {
        if let Err(e) = self.driver.remove(handle, true, true).await {
            tracing::warn!(container = %handle, error = %e, "best-effort cleanup failed");
        }
    }

    async fn with_timeout<T, F>(&self, secs: u64, op: &str, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        match tokio::time::timeout(Duration::from_secs(secs), fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(op.to_string())),
        }
    }
}
