//! The abstract container driver capability.
//!
//! A `ContainerDriver` is the only thing in this crate that is allowed to
//! know about a specific container runtime. The Sandbox Manager drives a
//! sandbox's lifecycle exclusively through this trait; it never reaches for
//! `bollard` (or any other backend) directly.

use std::collections::HashMap;

use async_trait::async_trait;
use sandboxd_core::Result;

/// Opaque reference to a running or stopped container, as handed back by
/// `ContainerDriver::create`. Callers treat this as a black box and pass it
/// back unmodified to every other driver method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle(pub String);

impl std::fmt::Display for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a caller needs to address a freshly-inspected container.
#[derive(Debug, Clone, Default)]
pub struct ContainerInfo {
    /// Network addresses reported by the runtime, in the order the runtime
    /// returned them. `select_address` picks the one a caller should use.
    pub network_addresses: Vec<String>,
}

/// Inputs to `ContainerDriver::create`.
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image_ref: String,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub exposed_port: u16,
    pub name: String,
}

/// Abstract lifecycle operations over a container runtime.
///
/// Every method carries an implicit per-operation timeout budget, enforced
/// by the caller (the Sandbox Manager wraps each call in `tokio::time::timeout`
/// using the durations in `SandboxConfig`); implementations should not add
/// their own timeouts on top of that.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Pull `image_ref` if it is not already present locally. Idempotent.
    async fn ensure_image(&self, image_ref: &str) -> Result<()>;

    /// Create (but do not start) a container per `spec`. Returns a handle
    /// that identifies it for every subsequent call.
    async fn create(&self, spec: &CreateSpec) -> Result<ContainerHandle>;

    /// Start a previously created container. On failure the caller should
    /// treat the container as unusable; implementations make a best-effort
    /// attempt to remove it before returning the error so a failed start
    /// never leaks a container.
    async fn start(&self, handle: &ContainerHandle) -> Result<()>;

    /// Fetch the current state of a running container, notably its network
    /// addresses.
    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo>;

    /// Ask the container to stop, allowing up to `grace_seconds` for a clean
    /// shutdown before the runtime escalates to a forceful kill.
    async fn stop(&self, handle: &ContainerHandle, grace_seconds: u64) -> Result<()>;

    /// Remove a container. `force` tears down a still-running container
    /// rather than erroring; `with_volumes` additionally removes any
    /// anonymous volumes the runtime attached to it.
    async fn remove(&self, handle: &ContainerHandle, force: bool, with_volumes: bool)
        -> Result<()>;
}

/// Picks the network address a caller should connect to out of the list a
/// driver's `inspect` reports.
///
/// Docker's default bridge network hands out `172.17.0.0/16` addresses that
/// are frequently unreachable from the host depending on network mode and
/// platform (notably Docker Desktop on macOS/Windows), so the first pass
/// skips them in favor of any other address — a dedicated bridge network or
/// an overlay network's address, for instance. If nothing else qualifies,
/// fall back to the first non-empty address rather than fail outright.
pub fn select_address(addresses: &[String]) -> Result<String> {
    if let Some(addr) = addresses
        .iter()
        .find(|a| !a.is_empty() && !a.starts_with("172.17."))
    {
        return Ok(addr.clone());
    }

    if let Some(addr) = addresses.iter().find(|a| !a.is_empty()) {
        return Ok(addr.clone());
    }

    Err(sandboxd_core::Error::NoAddress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_non_bridge_address() {
        let addrs = vec!["172.17.0.2".to_string(), "10.0.1.5".to_string()];
        assert_eq!(select_address(&addrs).unwrap(), "10.0.1.5");
    }

    #[test]
    fn falls_back_to_bridge_address_when_alone() {
        let addrs = vec!["172.17.0.2".to_string()];
        assert_eq!(select_address(&addrs).unwrap(), "172.17.0.2");
    }

    #[test]
    fn skips_empty_entries() {
        let addrs = vec!["".to_string(), "172.17.0.2".to_string(), "10.0.1.5".to_string()];
        assert_eq!(select_address(&addrs).unwrap(), "10.0.1.5");
    }

    #[test]
    fn errors_when_no_address_at_all() {
        let addrs: Vec<String> = vec![];
        assert!(select_address(&addrs).is_err());
    }
}
