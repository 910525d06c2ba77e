use async_trait::async_trait;

/// Container port published on a host port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Port inside the container, e.g. `26257`.
    pub container_port: u16,
    pub host_port: u16,
}

/// Everything the runtime needs to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Container name; must be unique on the host.
    pub name: String,
    /// Image reference including tag.
    pub image: String,
    pub hostname: String,
    pub cmd: Vec<String>,
    /// Container ports declared as exposed (TCP).
    pub exposed_ports: Vec<u16>,
    pub port_bindings: Vec<PortBinding>,
    /// Network the container is attached to; also used as its network mode.
    pub network: String,
    pub publish_all_ports: bool,
}

impl ContainerRequest {
    pub fn tcp_port_key(port: u16) -> String {
        format!("{port}/tcp")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedContainer {
    pub id: String,
    /// Non-fatal warnings reported by the runtime.
    pub warnings: Vec<String>,
}

/// Trait for container runtime backends.
///
/// Every call is a blocking round trip: it completes or fails outright and is
/// not cancelled midway.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Pull an image, consuming the progress stream to completion.
    async fn pull_image(&self, image: &str) -> anyhow::Result<()>;

    /// Create a bridged network. Returns its id.
    async fn create_network(&self, name: &str) -> anyhow::Result<String>;

    /// Remove a network. Fails while containers are still attached.
    async fn remove_network(&self, id: &str) -> anyhow::Result<()>;

    /// Create (but do not start) a container.
    async fn create_container(&self, request: &ContainerRequest)
        -> anyhow::Result<CreatedContainer>;

    async fn start_container(&self, id: &str) -> anyhow::Result<()>;

    /// Force-remove a container together with its volumes.
    async fn remove_container(&self, id: &str) -> anyhow::Result<()>;

    /// Runtime name for display.
    fn name(&self) -> &str;
}
