#![deny(unused)]
//! sandboxd — the sandbox runtime control-plane service.
//!
//! Provisions disposable container-based execution environments, dispatches
//! shell/ipython actions into them, and fans the in-container agent's
//! observations out to subscribers over a real-time socket per sandbox.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use sandboxd_api::{AppState, SandboxdServer, ServerConfig};
use sandboxd_core::config::AppConfig;
use sandboxd_driver::DockerDriver;
use sandboxd_runtime::{Dispatcher, Hub, Registry, SandboxManager};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (app_config, config_load_error) = match AppConfig::load() {
        Ok(config) => (config, None),
        Err(e) => (AppConfig::default(), Some(e)),
    };

    sandboxd_core::logging::configure_tracing(
        app_config.logging.rust_log.as_deref(),
        app_config.logging.json,
    )?;

    tracing::info!("starting sandboxd v{}", env!("CARGO_PKG_VERSION"));

    if let Some(e) = config_load_error {
        tracing::warn!(error = %e, "failed to load configuration files, using defaults");
    }

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;

    let driver: Arc<dyn sandboxd_driver::ContainerDriver> = match DockerDriver::connect() {
        Ok(driver) => {
            tracing::info!("connected to Docker daemon");
            Arc::new(driver)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to Docker daemon");
            return Err(e.into());
        }
    };

    let registry = Arc::new(Registry::new());
    let hub = Arc::new(Hub::new(registry.clone(), app_config.hub.clone()));

    let manager = Arc::new(
        SandboxManager::new(
            driver,
            registry.clone(),
            app_config.sandbox.clone(),
            app_config.server.port,
        )
        .with_hub(hub.clone()),
    );

    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), hub));

    let state = Arc::new(AppState {
        manager,
        dispatcher,
        registry,
        metrics_handle: Some(metrics_handle),
        hub_config: app_config.hub.clone(),
    });

    let server = SandboxdServer::new(
        ServerConfig {
            host: app_config.server.host.clone(),
            port: app_config.server.port,
            enable_cors: true,
        },
        state,
    );

    server.run().await?;

    Ok(())
}
