//! In-memory `ContainerDriver` for tests that exercise the Sandbox Manager
//! and the HTTP surface without a Docker daemon.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sandboxd_core::{Error, Result};
use tokio::sync::Mutex;

use crate::driver::{ContainerDriver, ContainerHandle, ContainerInfo, CreateSpec};

#[derive(Debug, Clone)]
struct MockContainer {
    started: bool,
    addresses: Vec<String>,
}

/// Records every call it receives and lets tests script failures for any
/// operation by name. Addresses default to a single loopback entry so
/// `select_address` has something to pick without extra setup.
#[derive(Clone)]
pub struct MockDriver {
    containers: Arc<Mutex<HashMap<String, MockContainer>>>,
    fail_on: Arc<Mutex<Vec<String>>>,
    default_addresses: Vec<String>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            containers: Arc::new(Mutex::new(HashMap::new())),
            fail_on: Arc::new(Mutex::new(Vec::new())),
            default_addresses: vec!["127.0.0.1".to_string()],
        }
    }

    pub fn with_addresses(addresses: Vec<String>) -> Self {
        let mut driver = Self::new();
        driver.default_addresses = addresses;
        driver
    }

    /// Make the next (and every subsequent) call to `operation` fail.
    pub async fn fail_next(&self, operation: &str) {
        self.fail_on.lock().await.push(operation.to_string());
    }

    async fn should_fail(&self, operation: &str) -> bool {
        let mut fail_on = self.fail_on.lock().await;
        if let Some(pos) = fail_on.iter().position(|o| o == operation) {
            fail_on.remove(pos);
            true
        } else {
            false
        }
    }

    pub async fn container_count(&self) -> usize {
        self.containers.lock().await.len()
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerDriver for MockDriver {
    async fn ensure_image(&self, image_ref: &str) -> Result<()> {
        if self.should_fail("ensure_image").await {
            return Err(Error::ImageFetch(image_ref.to_string()));
        }
        Ok(())
    }

    async fn create(&self, spec: &CreateSpec) -> Result<ContainerHandle> {
        if self.should_fail("create").await {
            return Err(Error::ContainerCreate(spec.name.clone()));
        }
        let handle = ContainerHandle(format!("mock-{}", uuid::Uuid::new_v4()));
        self.containers.lock().await.insert(
            handle.0.clone(),
            MockContainer {
                started: false,
                addresses: self.default_addresses.clone(),
            },
        );
        Ok(handle)
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        if self.should_fail("start").await {
            self.containers.lock().await.remove(&handle.0);
            return Err(Error::ContainerStart(handle.0.clone()));
        }
        let mut containers = self.containers.lock().await;
        let container = containers
            .get_mut(&handle.0)
            .ok_or_else(|| Error::internal(format!("unknown container {handle}")))?;
        container.started = true;
        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo> {
        if self.should_fail("inspect").await {
            return Err(Error::ContainerInspect(handle.0.clone()));
        }
        let containers = self.containers.lock().await;
        let container = containers
            .get(&handle.0)
            .ok_or_else(|| Error::internal(format!("unknown container {handle}")))?;
        Ok(ContainerInfo {
            network_addresses: container.addresses.clone(),
        })
    }

    async fn stop(&self, handle: &ContainerHandle, _grace_seconds: u64) -> Result<()> {
        if self.should_fail("stop").await {
            return Err(Error::ContainerStop(handle.0.clone()));
        }
        Ok(())
    }

    async fn remove(
        &self,
        handle: &ContainerHandle,
        _force: bool,
        _with_volumes: bool,
    ) -> Result<()> {
        if self.should_fail("remove").await {
            return Err(Error::ContainerRemove(handle.0.clone()));
        }
        self.containers.lock().await.remove(&handle.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CreateSpec {
        CreateSpec {
            image_ref: "sandboxd/agent:latest".into(),
            env: HashMap::new(),
            labels: HashMap::new(),
            exposed_port: 8088,
            name: "sandboxd-test".into(),
        }
    }

    #[tokio::test]
    async fn full_lifecycle_succeeds() {
        let driver = MockDriver::new();
        driver.ensure_image("sandboxd/agent:latest").await.unwrap();
        let handle = driver.create(&spec()).await.unwrap();
        driver.start(&handle).await.unwrap();
        let info = driver.inspect(&handle).await.unwrap();
        assert_eq!(info.network_addresses, vec!["127.0.0.1".to_string()]);
        driver.stop(&handle, 5).await.unwrap();
        driver.remove(&handle, true, true).await.unwrap();
        assert_eq!(driver.container_count().await, 0);
    }

    #[tokio::test]
    async fn scripted_start_failure_removes_container() {
        let driver = MockDriver::new();
        let handle = driver.create(&spec()).await.unwrap();
        driver.fail_next("start").await;
        assert!(driver.start(&handle).await.is_err());
        assert_eq!(driver.container_count().await, 0);
    }
}
