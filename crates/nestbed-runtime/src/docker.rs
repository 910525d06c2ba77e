//! Docker daemon backend, talking to the Engine API through bollard.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, NetworkingConfig, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{EndpointSettings, HostConfig, PortBinding as DockerPortBinding};
use bollard::network::CreateNetworkOptions;
use futures::StreamExt;
use tracing::{debug, info};

use crate::provider::{ContainerRequest, ContainerRuntime, CreatedContainer};

/// Container runtime backed by the local Docker daemon.
pub struct DockerRuntime {
    docker: Docker,
    name: String,
}

impl DockerRuntime {
    /// Connect with the local defaults (`DOCKER_HOST` or the unix socket) and ping the daemon.
    pub async fn connect() -> anyhow::Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        docker
            .ping()
            .await
            .context("Docker daemon did not answer ping")?;
        info!("Connected to Docker daemon");
        Ok(Self {
            docker,
            name: "docker".to_string(),
        })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker,
            name: "docker".to_string(),
        }
    }
}

/// Translate a runtime-neutral request into the Engine API container config.
pub(crate) fn container_config(request: &ContainerRequest) -> Config<String> {
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .exposed_ports
        .iter()
        .map(|port| (ContainerRequest::tcp_port_key(*port), HashMap::new()))
        .collect();

    let port_bindings: HashMap<String, Option<Vec<DockerPortBinding>>> = request
        .port_bindings
        .iter()
        .map(|binding| {
            (
                ContainerRequest::tcp_port_key(binding.container_port),
                Some(vec![DockerPortBinding {
                    host_ip: None,
                    host_port: Some(binding.host_port.to_string()),
                }]),
            )
        })
        .collect();

    let host_config = HostConfig {
        network_mode: Some(request.network.clone()),
        port_bindings: Some(port_bindings),
        publish_all_ports: Some(request.publish_all_ports),
        ..Default::default()
    };

    let mut endpoints = HashMap::new();
    endpoints.insert(request.network.clone(), EndpointSettings::default());

    Config {
        image: Some(request.image.clone()),
        hostname: Some(request.hostname.clone()),
        cmd: if request.cmd.is_empty() {
            None
        } else {
            Some(request.cmd.clone())
        },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        networking_config: Some(NetworkingConfig {
            endpoints_config: endpoints,
        }),
        ..Default::default()
    }
}

/// The daemon may omit the id of a freshly created network.
pub(crate) fn network_id(name: &str, id: Option<String>) -> anyhow::Result<String> {
    match id {
        Some(id) if !id.is_empty() => Ok(id),
        _ => anyhow::bail!("Docker returned no id for network {name}"),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            let progress = progress.with_context(|| format!("Failed to pull image {image}"))?;
            if let Some(status) = progress.status {
                debug!(image = %image, status = %status, "Pull progress");
            }
        }
        Ok(())
    }

    async fn create_network(&self, name: &str) -> anyhow::Result<String> {
        let options = CreateNetworkOptions {
            name,
            driver: "bridge",
            ..Default::default()
        };
        let response = self
            .docker
            .create_network(options)
            .await
            .with_context(|| format!("Failed to create network {name}"))?;
        network_id(name, response.id)
    }

    async fn remove_network(&self, id: &str) -> anyhow::Result<()> {
        self.docker
            .remove_network(id)
            .await
            .with_context(|| format!("Failed to remove network {id}"))?;
        Ok(())
    }

    async fn create_container(
        &self,
        request: &ContainerRequest,
    ) -> anyhow::Result<CreatedContainer> {
        let options = CreateContainerOptions {
            name: request.name.clone(),
            platform: None,
        };
        let response = self
            .docker
            .create_container(Some(options), container_config(request))
            .await
            .with_context(|| format!("Failed to create container {}", request.name))?;
        Ok(CreatedContainer {
            id: response.id,
            warnings: response.warnings,
        })
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to start container {id}"))?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker
            .remove_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to remove container {id}"))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
