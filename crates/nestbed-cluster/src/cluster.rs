//! Cluster lifecycle: `Uninitialized -> NetworkReady -> NodesProvisioned -> Running`,
//! ending in `Cleaned` or `Failed`.
//!
//! Nothing is rolled back automatically. Every runtime resource is recorded in
//! [`Cluster::resources`] as soon as it exists, so after a failed `create` or
//! `start` the caller runs [`Cluster::cleanup`] to remove exactly what was built.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use nestbed_core::config::ConnectionConfig;
use nestbed_core::ports::PortAllocator;
use nestbed_core::types::{
    ClusterSettings, ClusterState, ContainerSpec, ExposedPorts, FaultInjectionConfig,
    NetworkHandle, NodeHandle, ProxyEndpoint, ResourceKind, SidecarHandle, TrackedResource,
};
use nestbed_core::{NestbedError, Result};
use nestbed_proxy::{ProxyConnector, ProxyControl};
use nestbed_runtime::ContainerRuntime;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::broker::{ConnectionBroker, ConnectionHandle, DatabaseConnector};
use crate::fault_injection::FaultInjectionProxyManager;
use crate::network::NetworkManager;
use crate::provisioner::NodeProvisioner;

/// Collaborators a cluster talks to.
#[derive(Clone)]
pub struct ClusterDeps {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub ports: Arc<dyn PortAllocator>,
    pub proxies: Arc<dyn ProxyConnector>,
    pub database: Arc<dyn DatabaseConnector>,
}

/// An ephemeral multi-node cluster. Not meant for concurrent mutation.
pub struct Cluster {
    settings: ClusterSettings,
    state: ClusterState,
    runtime: Arc<dyn ContainerRuntime>,
    networks: NetworkManager,
    provisioner: NodeProvisioner,
    fault: Option<FaultInjectionProxyManager>,
    broker: ConnectionBroker,
    network: Option<NetworkHandle>,
    nodes: Vec<NodeHandle>,
    proxies: BTreeMap<String, ProxyEndpoint>,
    connections: HashMap<String, ConnectionHandle>,
    resources: Vec<TrackedResource>,
}

impl Cluster {
    pub fn new(
        settings: ClusterSettings,
        spec: ContainerSpec,
        fault_config: FaultInjectionConfig,
        connection: ConnectionConfig,
        deps: ClusterDeps,
    ) -> Result<Self> {
        settings.validate()?;
        connection.backoff.validate()?;
        let fault = settings.enable_fault_injection.then(|| {
            FaultInjectionProxyManager::new(
                deps.runtime.clone(),
                deps.ports.clone(),
                deps.proxies.clone(),
                fault_config,
            )
        });
        Ok(Self {
            settings,
            state: ClusterState::Uninitialized,
            networks: NetworkManager::new(deps.runtime.clone()),
            provisioner: NodeProvisioner::new(deps.runtime.clone(), deps.ports.clone(), spec),
            fault,
            broker: ConnectionBroker::new(
                deps.database,
                connection.backoff,
                connection.application_name,
            ),
            runtime: deps.runtime,
            network: None,
            nodes: Vec::with_capacity(settings.size),
            proxies: BTreeMap::new(),
            connections: HashMap::new(),
            resources: Vec::new(),
        })
    }

    /// Pull images, create the network, the optional sidecar and every node.
    ///
    /// On failure the cluster moves to `Failed` and keeps whatever was created.
    pub async fn create(&mut self) -> Result<()> {
        self.create_with(&CancellationToken::new()).await
    }

    /// [`Cluster::create`] that stops before the next step once `cancel` fires.
    ///
    /// A cancelled create fails with [`NestbedError::Cancelled`] and leaves the
    /// resources built so far tracked for [`Cluster::cleanup`].
    pub async fn create_with(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != ClusterState::Uninitialized {
            return Err(NestbedError::invalid_state(
                "create cluster",
                format!("cluster is {}", self.state),
            ));
        }
        info!(
            size = self.settings.size,
            fault_injection = self.settings.enable_fault_injection,
            runtime = %self.runtime.name(),
            "Creating cluster"
        );
        match self.provision(cancel).await {
            Ok(()) => {
                self.state = ClusterState::NodesProvisioned;
                info!(nodes = self.nodes.len(), "Cluster provisioned");
                Ok(())
            }
            Err(e) => {
                error!(state = %self.state, error = %e, "Cluster creation failed");
                self.state = ClusterState::Failed;
                Err(e)
            }
        }
    }

    async fn provision(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.pull_images(cancel).await?;

        let network_name = self.provisioner.spec().network_name.clone();
        check_cancelled(cancel, || format!("creating network {network_name}"))?;
        let network = self.networks.create_network(&network_name).await?;
        self.track(ResourceKind::Network, &network.name, &network.id);
        self.network = Some(network.clone());

        if let Some(fault) = self.fault.as_mut() {
            check_cancelled(cancel, || format!("starting sidecar {}", fault.config().name))?;
            let started = fault.start(&network).await;
            if let Some(sidecar) = fault.sidecar().cloned() {
                self.track(ResourceKind::Sidecar, &sidecar.name, &sidecar.container_id);
            }
            started?;
        }
        self.state = ClusterState::NetworkReady;

        for index in 0..self.settings.size {
            let node = NodeHandle::declare(index, self.provisioner.spec().node_name(index));
            check_cancelled(cancel, || format!("creating node {}", node.name))?;
            let join_target = self.join_target_for(&node)?;

            let advertise = match self.fault.as_mut() {
                Some(fault) => {
                    let upstream =
                        format!("{}:{}", node.hostname, self.provisioner.spec().database_port);
                    let endpoint = fault.add_proxy(&node.name, &upstream).await?;
                    self.proxies.insert(node.name.clone(), endpoint.clone());
                    Some(endpoint)
                }
                None => None,
            };

            let node = self
                .provisioner
                .add_node(node, &network, join_target.as_deref(), advertise.as_ref())
                .await?;
            if let Some(id) = &node.container_id {
                self.track(ResourceKind::Node, &node.name, id);
            }
            self.nodes.push(node);
        }
        Ok(())
    }

    async fn pull_images(&self, cancel: &CancellationToken) -> Result<()> {
        let mut images = vec![self.provisioner.spec().image_with_tag()];
        if let Some(fault) = &self.fault {
            images.push(fault.config().image_with_tag());
        }
        for image in images {
            check_cancelled(cancel, || format!("pulling image {image}"))?;
            self.runtime
                .pull_image(&image)
                .await
                .map_err(|e| NestbedError::runtime(format!("image {image}"), e))?;
        }
        Ok(())
    }

    /// Node 0 joins nobody. Later nodes join node 0, through its proxy when
    /// fault injection is on.
    fn join_target_for(&self, node: &NodeHandle) -> Result<Option<String>> {
        if node.is_bootstrap() {
            return Ok(None);
        }
        let bootstrap = self
            .nodes
            .first()
            .ok_or_else(|| NestbedError::invalid_state("join cluster", "no bootstrap node"))?;
        let address = bootstrap.join_address().ok_or_else(|| {
            NestbedError::invalid_state(
                &format!("join {}", bootstrap.name),
                format!("node is {}", bootstrap.state),
            )
        })?;
        if self.fault.is_none() {
            return Ok(Some(address.to_string()));
        }
        let proxy = self.proxies.get(&bootstrap.name).ok_or_else(|| {
            NestbedError::invalid_state(
                &format!("join {} through a proxy", bootstrap.name),
                "no proxy registered",
            )
        })?;
        Ok(Some(proxy.listen.clone()))
    }

    /// Start every node in creation order.
    pub async fn start(&mut self) -> Result<()> {
        self.start_with(&CancellationToken::new()).await
    }

    /// [`Cluster::start`] that stops before the next node once `cancel` fires.
    pub async fn start_with(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != ClusterState::NodesProvisioned {
            return Err(NestbedError::invalid_state(
                "start cluster",
                format!("cluster is {}", self.state),
            ));
        }
        for i in 0..self.nodes.len() {
            let name = self.nodes[i].name.clone();
            let started = match check_cancelled(cancel, || format!("starting node {name}")) {
                Ok(()) => self.provisioner.start_node(&mut self.nodes[i]).await,
                Err(e) => Err(e),
            };
            if let Err(e) = started {
                error!(node = %self.nodes[i].name, error = %e, "Cluster start failed");
                self.state = ClusterState::Failed;
                return Err(e);
            }
        }
        self.state = ClusterState::Running;
        info!(nodes = self.nodes.len(), "Cluster running");
        Ok(())
    }

    /// Remove every live resource: nodes, then the sidecar, then the network.
    ///
    /// Keeps going past failures, logging each leak, and returns the first one.
    /// Already removed resources are skipped, so calling this again only
    /// retries what leaked.
    pub async fn cleanup(&mut self) -> Result<()> {
        info!(state = %self.state, "Cleaning up cluster");
        self.connections.clear();
        let mut first_error: Option<NestbedError> = None;

        for kind in [ResourceKind::Node, ResourceKind::Sidecar, ResourceKind::Network] {
            for i in 0..self.resources.len() {
                if self.resources[i].kind != kind || !self.resources[i].live {
                    continue;
                }
                match self.remove(i).await {
                    Ok(()) => self.resources[i].live = false,
                    Err(e) => {
                        // The sidecar manager logs its own leak.
                        if kind != ResourceKind::Sidecar {
                            let resource = &self.resources[i];
                            error!(
                                target: "nestbed::leak",
                                kind = %resource.kind,
                                name = %resource.name,
                                id = %resource.id,
                                error = %e,
                                "Failed to remove resource; leaked"
                            );
                        }
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            None => {
                self.state = ClusterState::Cleaned;
                info!("Cluster cleaned up");
                Ok(())
            }
            Some(e) => {
                self.state = ClusterState::Failed;
                Err(e)
            }
        }
    }

    async fn remove(&mut self, index: usize) -> Result<()> {
        let resource = self.resources[index].clone();
        match resource.kind {
            ResourceKind::Node => {
                let node = self
                    .nodes
                    .iter()
                    .find(|n| n.container_id.as_deref() == Some(resource.id.as_str()))
                    .ok_or_else(|| {
                        NestbedError::invalid_state(
                            &format!("remove node {}", resource.name),
                            "node is not tracked",
                        )
                    })?;
                self.provisioner.remove_node(node).await
            }
            ResourceKind::Sidecar => match self.fault.as_mut() {
                Some(fault) => fault.stop().await,
                None => Ok(()),
            },
            ResourceKind::Network => {
                let network = NetworkHandle {
                    id: resource.id,
                    name: resource.name,
                };
                self.networks.remove_network(&network).await
            }
        }
    }

    /// Connection to `database` on the bootstrap node, cached per database.
    pub async fn get_connection(
        &mut self,
        database: &str,
        cancel: &CancellationToken,
    ) -> Result<ConnectionHandle> {
        if self.state != ClusterState::Running {
            return Err(NestbedError::invalid_state(
                "connect to cluster",
                format!("cluster is {}", self.state),
            ));
        }
        if let Some(conn) = self.connections.get(database) {
            return Ok(conn.clone());
        }
        let url = self.connection_url(database).ok_or_else(|| {
            NestbedError::invalid_state(
                "connect to cluster",
                "bootstrap node has no exposed database port",
            )
        })?;
        info!(database = %database, "Waiting for database");
        let conn = self.broker.connect(&url, cancel).await?;
        self.connections.insert(database.to_string(), conn.clone());
        Ok(conn)
    }

    pub fn state(&self) -> ClusterState {
        self.state
    }

    pub fn settings(&self) -> &ClusterSettings {
        &self.settings
    }

    /// Nodes in creation order. They stay listed after cleanup, with the
    /// state they last had.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.nodes
    }

    /// Every runtime resource created so far, with its removal status.
    pub fn resources(&self) -> &[TrackedResource] {
        &self.resources
    }

    /// Proxy endpoints by node name; empty without fault injection.
    pub fn proxies(&self) -> &BTreeMap<String, ProxyEndpoint> {
        &self.proxies
    }

    pub fn sidecar(&self) -> Option<&SidecarHandle> {
        self.fault.as_ref().and_then(|f| f.sidecar())
    }

    pub fn network(&self) -> Option<&NetworkHandle> {
        self.network.as_ref()
    }

    /// Host ports of the bootstrap node while its container exists.
    pub fn exposed_ports(&self) -> Option<ExposedPorts> {
        let node = self.nodes.first()?;
        let id = node.container_id.as_deref()?;
        if !self.is_live(id) {
            return None;
        }
        node.exposed_ports
    }

    pub fn connection_url(&self, database: &str) -> Option<String> {
        self.exposed_ports()
            .map(|ports| self.broker.connection_url(ports.database, database))
    }

    /// Control client of the fault-injection sidecar, for adding toxics.
    pub fn proxy_control(&self) -> Option<Arc<dyn ProxyControl>> {
        self.fault.as_ref().and_then(|f| f.control())
    }

    fn is_live(&self, id: &str) -> bool {
        self.resources.iter().any(|r| r.id == id && r.live)
    }

    fn track(&mut self, kind: ResourceKind, name: &str, id: &str) {
        self.resources.push(TrackedResource {
            kind,
            name: name.to_string(),
            id: id.to_string(),
            live: true,
        });
    }
}

fn check_cancelled(cancel: &CancellationToken, next: impl FnOnce() -> String) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(NestbedError::Cancelled(next()));
    }
    Ok(())
}
