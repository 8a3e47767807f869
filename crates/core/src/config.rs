//! Typed configuration for the sandbox runtime.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxConfig,
    pub hub: HubConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Image reference, host alias, label scope, and per-operation timeout
/// budget for the Container Driver (spec §4.1).
#[derive(Debug, Deserialize, Clone)]
pub struct SandboxConfig {
    pub image: String,
    /// Host-as-seen-from-container, injected into the observation-ingress URL.
    pub runtime_host: String,
    /// Label applied to every container this runtime creates, used to scope
    /// discovery of managed containers.
    pub label_scope: String,
    pub pull_timeout_secs: u64,
    pub create_timeout_secs: u64,
    pub start_timeout_secs: u64,
    pub inspect_timeout_secs: u64,
    pub stop_timeout_secs: u64,
    pub remove_timeout_secs: u64,
    pub stop_grace_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "sandboxd/agent:latest".into(),
            runtime_host: "host.docker.internal".into(),
            label_scope: "sandboxd.managed".into(),
            pull_timeout_secs: 300,
            create_timeout_secs: 30,
            start_timeout_secs: 15,
            inspect_timeout_secs: 10,
            stop_timeout_secs: 10,
            remove_timeout_secs: 15,
            stop_grace_secs: 5,
        }
    }
}

/// Observation Hub bounded-queue and heartbeat parameters (spec §4.4).
#[derive(Debug, Deserialize, Clone)]
pub struct HubConfig {
    pub subscriber_queue_depth: usize,
    pub ingress_queue_depth: usize,
    pub heartbeat_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_depth: 64,
            ingress_queue_depth: 256,
            heartbeat_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub rust_log: Option<String>,
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("SANDBOXD_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Maps SANDBOXD__SERVER__PORT=9000 to server.port
            .add_source(Environment::with_prefix("SANDBOXD").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sandbox: SandboxConfig::default(),
            hub: HubConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
