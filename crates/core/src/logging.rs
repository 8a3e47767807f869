//! Tracing/log initialization.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::Result;

/// Initialize the global tracing subscriber.
///
/// `rust_log` overrides the env filter (falls back to `RUST_LOG`, then a
/// sensible default); `json` switches the formatter to structured JSON
/// output for log aggregation.
pub fn configure_tracing(rust_log: Option<&str>, json: bool) -> Result<()> {
    let filter = rust_log
        .map(String::from)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info,sandboxd=debug".to_string());

    let env_filter = tracing_subscriber::EnvFilter::new(filter);
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    Ok(())
}
