//! Docker-backed `ContainerDriver`, implemented against the local daemon via
//! `bollard`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use sandboxd_core::{Error, Result};

use crate::driver::{ContainerDriver, ContainerHandle, ContainerInfo, CreateSpec};

/// `ContainerDriver` implementation talking to the Docker Engine API.
pub struct DockerDriver {
    docker: bollard::Docker,
}

impl DockerDriver {
    /// Connect to the Docker daemon using the same discovery rules as the
    /// `docker` CLI (`DOCKER_HOST`, or the local socket).
    pub fn connect() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults()
            .map_err(|e| Error::internal(format!("failed to connect to Docker daemon: {e}")))?;
        Ok(Self { docker })
    }

    /// Build a driver from an already-constructed client, mainly for tests
    /// that point at a mock Docker API server.
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerDriver for DockerDriver {
    async fn ensure_image(&self, image_ref: &str) -> Result<()> {
        if self.docker.inspect_image(image_ref).await.is_ok() {
            return Ok(());
        }

        let options = CreateImageOptions {
            from_image: image_ref,
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| Error::ImageFetch(format!("{image_ref}: {e}")))?;
        }

        self.docker
            .inspect_image(image_ref)
            .await
            .map_err(|e| Error::ImageFetch(format!("{image_ref}: still absent after pull: {e}")))?;

        Ok(())
    }

    async fn create(&self, spec: &CreateSpec) -> Result<ContainerHandle> {
        let env: Vec<String> = spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{}/tcp", spec.exposed_port), HashMap::new());

        let host_config = HostConfig {
            publish_all_ports: Some(true),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image_ref.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::ContainerCreate(e.to_string()))?;

        Ok(ContainerHandle(response.id))
    }

    async fn start(&self, handle: &ContainerHandle) -> Result<()> {
        let result = self
            .docker
            .start_container::<String>(&handle.0, None)
            .await;

        if let Err(e) = result {
            tracing::warn!(container = %handle, error = %e, "start failed, removing container");
            let _ = self
                .docker
                .remove_container(
                    &handle.0,
                    Some(RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(Error::ContainerStart(e.to_string()));
        }

        Ok(())
    }

    async fn inspect(&self, handle: &ContainerHandle) -> Result<ContainerInfo> {
        let details = self
            .docker
            .inspect_container(&handle.0, None)
            .await
            .map_err(|e| Error::ContainerInspect(e.to_string()))?;

        let mut addresses = Vec::new();
        if let Some(networks) = details
            .network_settings
            .and_then(|settings| settings.networks)
        {
            for (_, network) in networks {
                if let Some(addr) = network.ip_address {
                    if !addr.is_empty() {
                        addresses.push(addr);
                    }
                }
            }
        }

        Ok(ContainerInfo {
            network_addresses: addresses,
        })
    }

    async fn stop(&self, handle: &ContainerHandle, grace_seconds: u64) -> Result<()> {
        match self
            .docker
            .stop_container(
                &handle.0,
                Some(StopContainerOptions {
                    t: grace_seconds as i64,
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            // Already gone counts as success (spec.md §4.1's `already_gone`).
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::ContainerStop(e.to_string())),
        }
    }

    async fn remove(
        &self,
        handle: &ContainerHandle,
        force: bool,
        with_volumes: bool,
    ) -> Result<()> {
        match self
            .docker
            .remove_container(
                &handle.0,
                Some(RemoveContainerOptions {
                    force,
                    v: with_volumes,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(Error::ContainerRemove(e.to_string())),
        }
    }
}
