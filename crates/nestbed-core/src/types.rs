use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{NestbedError, Result};

/// Shape of the cluster to provision. Immutable once a cluster is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSettings {
    pub size: usize,
    #[serde(default)]
    pub enable_fault_injection: bool,
}

impl ClusterSettings {
    pub fn new(size: usize, enable_fault_injection: bool) -> Self {
        Self {
            size,
            enable_fault_injection,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.size < 1 {
            return Err(NestbedError::Config(
                "cluster size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            size: 3,
            enable_fault_injection: false,
        }
    }
}

/// Provisioning parameters for the container-runtime backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    pub tag: String,
    pub network_name: String,
    pub name_prefix: String,
    /// Database port inside every node container.
    #[serde(default = "default_database_port")]
    pub database_port: u16,
    /// Admin UI port inside every node container.
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
}

fn default_database_port() -> u16 {
    26257
}

fn default_admin_port() -> u16 {
    8080
}

impl ContainerSpec {
    pub fn image_with_tag(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    /// Container name and hostname of the node at `index`: `prefix-index`.
    pub fn node_name(&self, index: usize) -> String {
        format!("{}-{}", self.name_prefix, index)
    }
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: "cockroachdb/cockroach".to_string(),
            tag: "latest".to_string(),
            network_name: "roachnet".to_string(),
            name_prefix: "roach".to_string(),
            database_port: default_database_port(),
            admin_port: default_admin_port(),
        }
    }
}

/// Settings for the fault-injection sidecar container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultInjectionConfig {
    #[serde(default = "default_sidecar_image")]
    pub image: String,
    #[serde(default = "default_sidecar_tag")]
    pub tag: String,
    /// Container name and hostname; proxy listen addresses use it as host.
    #[serde(default = "default_sidecar_name")]
    pub name: String,
    /// Control API port inside the sidecar container.
    #[serde(default = "default_sidecar_api_port")]
    pub api_port: u16,
}

fn default_sidecar_image() -> String {
    "shopify/toxiproxy".to_string()
}

fn default_sidecar_tag() -> String {
    "latest".to_string()
}

fn default_sidecar_name() -> String {
    "toxi".to_string()
}

fn default_sidecar_api_port() -> u16 {
    8474
}

impl FaultInjectionConfig {
    pub fn image_with_tag(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            image: default_sidecar_image(),
            tag: default_sidecar_tag(),
            name: default_sidecar_name(),
            api_port: default_sidecar_api_port(),
        }
    }
}

/// A runtime-level bridged network owned by one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkHandle {
    pub id: String,
    pub name: String,
}

/// Node lifecycle. Join addresses are only derived from nodes that reached `Created`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeState {
    Declared,
    Created,
    Started,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeState::Declared => write!(f, "declared"),
            NodeState::Created => write!(f, "created"),
            NodeState::Started => write!(f, "started"),
        }
    }
}

/// Host ports bound into the bootstrap node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExposedPorts {
    pub database: u16,
    pub admin: u16,
}

/// One cluster member container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandle {
    pub index: usize,
    pub name: String,
    pub hostname: String,
    pub container_id: Option<String>,
    pub state: NodeState,
    /// Address this node was told to join; `None` for the bootstrap node.
    pub join_target: Option<String>,
    /// Host port bindings; only the bootstrap node carries them.
    pub exposed_ports: Option<ExposedPorts>,
    /// Address advertised to peers when it differs from `hostname:port`.
    pub advertise_address: Option<String>,
}

impl NodeHandle {
    pub fn declare(index: usize, name: String) -> Self {
        Self {
            index,
            hostname: name.clone(),
            name,
            container_id: None,
            state: NodeState::Declared,
            join_target: None,
            exposed_ports: None,
            advertise_address: None,
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.index == 0
    }

    /// Hostname other nodes may join through. `None` until the container exists.
    pub fn join_address(&self) -> Option<&str> {
        if self.state >= NodeState::Created {
            Some(&self.hostname)
        } else {
            None
        }
    }
}

/// A listen/upstream pair registered on the fault-injection sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    pub name: String,
    pub listen: String,
    pub upstream: String,
}

impl ProxyEndpoint {
    /// Split the listen address into host and port for advertise flags.
    pub fn listen_host_port(&self) -> Result<(&str, &str)> {
        self.listen
            .rsplit_once(':')
            .filter(|(host, port)| !host.is_empty() && !port.is_empty())
            .ok_or_else(|| {
                NestbedError::Config(format!(
                    "proxy {} has malformed listen address {:?}",
                    self.name, self.listen
                ))
            })
    }
}

/// The running fault-injection sidecar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarHandle {
    pub container_id: String,
    pub name: String,
    /// Host port the control API is bound to.
    pub api_port: u16,
}

impl SidecarHandle {
    pub fn api_addr(&self) -> String {
        format!("localhost:{}", self.api_port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    NetworkReady,
    NodesProvisioned,
    Running,
    Cleaned,
    Failed,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::Uninitialized => write!(f, "Uninitialized"),
            ClusterState::NetworkReady => write!(f, "NetworkReady"),
            ClusterState::NodesProvisioned => write!(f, "NodesProvisioned"),
            ClusterState::Running => write!(f, "Running"),
            ClusterState::Cleaned => write!(f, "Cleaned"),
            ClusterState::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Network,
    Node,
    Sidecar,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Network => write!(f, "network"),
            ResourceKind::Node => write!(f, "node"),
            ResourceKind::Sidecar => write!(f, "sidecar"),
        }
    }
}

/// Entry in a cluster's ledger of runtime resources created so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
    /// False once removal succeeded.
    pub live: bool,
}
