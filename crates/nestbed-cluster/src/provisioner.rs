use std::sync::Arc;

use nestbed_core::ports::PortAllocator;
use nestbed_core::types::{
    ContainerSpec, ExposedPorts, NetworkHandle, NodeHandle, NodeState, ProxyEndpoint,
};
use nestbed_core::{NestbedError, Result};
use nestbed_runtime::{ContainerRequest, ContainerRuntime, PortBinding};
use tracing::{info, warn};

/// Creates, starts and removes node containers.
pub struct NodeProvisioner {
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<dyn PortAllocator>,
    spec: ContainerSpec,
}

impl NodeProvisioner {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<dyn PortAllocator>,
        spec: ContainerSpec,
    ) -> Self {
        Self {
            runtime,
            ports,
            spec,
        }
    }

    pub fn spec(&self) -> &ContainerSpec {
        &self.spec
    }

    /// Node command line: `start --insecure [--join=..] [--advertise-host=.. --advertise-port=..]`.
    pub fn command(join_target: Option<&str>, advertise: Option<&ProxyEndpoint>) -> Result<Vec<String>> {
        let mut cmd = vec!["start".to_string(), "--insecure".to_string()];
        if let Some(target) = join_target {
            cmd.push(format!("--join={target}"));
        }
        if let Some(endpoint) = advertise {
            let (host, port) = endpoint.listen_host_port()?;
            cmd.push(format!("--advertise-host={host}"));
            cmd.push(format!("--advertise-port={port}"));
        }
        Ok(cmd)
    }

    /// Create the container for a declared node.
    ///
    /// A node without a join target is the bootstrap node and is the only one
    /// that gets host port bindings.
    pub async fn add_node(
        &self,
        node: NodeHandle,
        network: &NetworkHandle,
        join_target: Option<&str>,
        advertise: Option<&ProxyEndpoint>,
    ) -> Result<NodeHandle> {
        if node.state != NodeState::Declared {
            return Err(NestbedError::invalid_state(
                &format!("create node {}", node.name),
                format!("node is {}", node.state),
            ));
        }
        if join_target.is_some_and(str::is_empty) {
            return Err(NestbedError::Config(format!(
                "node {} was given an empty join target",
                node.name
            )));
        }

        let cmd = Self::command(join_target, advertise)?;
        let exposed = match join_target {
            None => Some(self.acquire_exposed_ports()?),
            Some(_) => None,
        };

        let port_bindings = exposed
            .map(|ports| {
                vec![
                    PortBinding {
                        container_port: self.spec.database_port,
                        host_port: ports.database,
                    },
                    PortBinding {
                        container_port: self.spec.admin_port,
                        host_port: ports.admin,
                    },
                ]
            })
            .unwrap_or_default();

        let request = ContainerRequest {
            name: node.name.clone(),
            image: self.spec.image_with_tag(),
            hostname: node.hostname.clone(),
            cmd,
            exposed_ports: vec![self.spec.database_port, self.spec.admin_port],
            port_bindings,
            network: network.name.clone(),
            publish_all_ports: false,
        };

        info!(
            node = %node.name,
            join = join_target.unwrap_or(""),
            "Creating node"
        );
        let created = match self.runtime.create_container(&request).await {
            Ok(created) => created,
            Err(e) => {
                if let Some(ports) = exposed {
                    self.ports.release(ports.database);
                    self.ports.release(ports.admin);
                }
                return Err(NestbedError::runtime(format!("node {}", node.name), e));
            }
        };
        for warning in &created.warnings {
            warn!(node = %node.name, warning = %warning, "Runtime warning");
        }

        Ok(NodeHandle {
            container_id: Some(created.id),
            state: NodeState::Created,
            join_target: join_target.map(str::to_string),
            exposed_ports: exposed,
            advertise_address: advertise.map(|endpoint| endpoint.listen.clone()),
            ..node
        })
    }

    pub async fn start_node(&self, node: &mut NodeHandle) -> Result<()> {
        let id = match (&node.container_id, node.state) {
            (Some(id), NodeState::Created) => id.clone(),
            _ => {
                return Err(NestbedError::invalid_state(
                    &format!("start node {}", node.name),
                    format!("node is {}", node.state),
                ));
            }
        };
        self.runtime
            .start_container(&id)
            .await
            .map_err(|e| NestbedError::runtime(format!("node {}", node.name), e))?;
        node.state = NodeState::Started;
        info!(node = %node.name, "Started node");
        Ok(())
    }

    /// Force-remove the node's container and hand its host ports back.
    pub async fn remove_node(&self, node: &NodeHandle) -> Result<()> {
        let Some(id) = &node.container_id else {
            return Ok(());
        };
        self.runtime
            .remove_container(id)
            .await
            .map_err(|e| NestbedError::runtime(format!("node {}", node.name), e))?;
        if let Some(ports) = node.exposed_ports {
            self.ports.release(ports.database);
            self.ports.release(ports.admin);
        }
        info!(node = %node.name, "Removed node");
        Ok(())
    }

    fn acquire_exposed_ports(&self) -> Result<ExposedPorts> {
        let database = self.ports.acquire()?;
        let admin = match self.ports.acquire() {
            Ok(port) => port,
            Err(e) => {
                self.ports.release(database);
                return Err(e);
            }
        };
        Ok(ExposedPorts { database, admin })
    }
}
