//! Fault-injection sidecar: one proxy route per node so traffic between
//! nodes can be delayed, cut or partitioned without the nodes knowing.

use std::sync::Arc;

use nestbed_core::ports::PortAllocator;
use nestbed_core::types::{FaultInjectionConfig, NetworkHandle, ProxyEndpoint, SidecarHandle};
use nestbed_core::{NestbedError, Result};
use nestbed_proxy::{ProxyConnector, ProxyControl};
use nestbed_runtime::{ContainerRequest, ContainerRuntime, PortBinding};
use tracing::{error, info, warn};

pub struct FaultInjectionProxyManager {
    runtime: Arc<dyn ContainerRuntime>,
    ports: Arc<dyn PortAllocator>,
    connector: Arc<dyn ProxyConnector>,
    config: FaultInjectionConfig,
    sidecar: Option<SidecarHandle>,
    control: Option<Arc<dyn ProxyControl>>,
    /// Host ports held for the API binding and every proxy listener.
    held_ports: Vec<u16>,
}

impl FaultInjectionProxyManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: Arc<dyn PortAllocator>,
        connector: Arc<dyn ProxyConnector>,
        config: FaultInjectionConfig,
    ) -> Self {
        Self {
            runtime,
            ports,
            connector,
            config,
            sidecar: None,
            control: None,
            held_ports: Vec::new(),
        }
    }

    pub fn config(&self) -> &FaultInjectionConfig {
        &self.config
    }

    /// The sidecar container, once it has been created (even if it never started).
    pub fn sidecar(&self) -> Option<&SidecarHandle> {
        self.sidecar.as_ref()
    }

    /// Control client, available once the sidecar is running.
    pub fn control(&self) -> Option<Arc<dyn ProxyControl>> {
        self.control.clone()
    }

    /// Launch the sidecar on `network` with its control API bound to a free host port.
    pub async fn start(&mut self, network: &NetworkHandle) -> Result<SidecarHandle> {
        if let Some(sidecar) = &self.sidecar {
            return Err(NestbedError::invalid_state(
                "start sidecar",
                format!("sidecar {} already exists", sidecar.name),
            ));
        }

        let api_port = self.ports.acquire()?;
        let request = ContainerRequest {
            name: self.config.name.clone(),
            image: self.config.image_with_tag(),
            hostname: self.config.name.clone(),
            cmd: Vec::new(),
            exposed_ports: vec![self.config.api_port],
            port_bindings: vec![PortBinding {
                container_port: self.config.api_port,
                host_port: api_port,
            }],
            network: network.name.clone(),
            publish_all_ports: true,
        };

        info!(
            sidecar = %self.config.name,
            api_port,
            "Creating fault-injection sidecar"
        );
        let created = match self.runtime.create_container(&request).await {
            Ok(created) => created,
            Err(e) => {
                self.ports.release(api_port);
                return Err(NestbedError::runtime(
                    format!("sidecar {}", self.config.name),
                    e,
                ));
            }
        };
        for warning in &created.warnings {
            warn!(sidecar = %self.config.name, warning = %warning, "Runtime warning");
        }

        self.held_ports.push(api_port);
        let sidecar = SidecarHandle {
            container_id: created.id,
            name: self.config.name.clone(),
            api_port,
        };
        self.sidecar = Some(sidecar.clone());

        self.runtime
            .start_container(&sidecar.container_id)
            .await
            .map_err(|e| NestbedError::runtime(format!("sidecar {}", sidecar.name), e))?;

        let control = self
            .connector
            .connect(&sidecar.api_addr())
            .map_err(|e| NestbedError::runtime(format!("sidecar {}", sidecar.name), e))?;
        self.control = Some(control);

        info!(sidecar = %sidecar.name, api = %sidecar.api_addr(), "Sidecar started");
        Ok(sidecar)
    }

    /// Register a route `<sidecar>:<free port>` -> `upstream` for `node_name`.
    pub async fn add_proxy(&mut self, node_name: &str, upstream: &str) -> Result<ProxyEndpoint> {
        let control = self
            .control
            .clone()
            .ok_or_else(|| NestbedError::invalid_state("add proxy", "sidecar is not running"))?;

        let port = self.ports.acquire()?;
        let listen = format!("{}:{port}", self.config.name);
        let proxy = match control.create_proxy(node_name, &listen, upstream).await {
            Ok(proxy) => proxy,
            Err(e) => {
                self.ports.release(port);
                return Err(NestbedError::runtime(format!("proxy {node_name}"), e));
            }
        };
        self.held_ports.push(port);

        info!(
            proxy = %proxy.name,
            listen = %proxy.listen,
            upstream = %proxy.upstream,
            "Registered proxy"
        );
        Ok(ProxyEndpoint {
            name: proxy.name,
            listen: proxy.listen,
            upstream: proxy.upstream,
        })
    }

    /// Remove the sidecar. A failure is logged as a leak and leaves the
    /// handle in place so a later call can retry.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(sidecar) = self.sidecar.clone() else {
            return Ok(());
        };

        if let Err(e) = self.runtime.remove_container(&sidecar.container_id).await {
            error!(
                target: "nestbed::leak",
                kind = "sidecar",
                name = %sidecar.name,
                id = %sidecar.container_id,
                error = %format!("{e:#}"),
                "Failed to remove sidecar; container leaked"
            );
            return Err(NestbedError::runtime(format!("sidecar {}", sidecar.name), e));
        }

        for port in self.held_ports.drain(..) {
            self.ports.release(port);
        }
        self.sidecar = None;
        self.control = None;
        info!(sidecar = %sidecar.name, "Removed sidecar");
        Ok(())
    }
}
