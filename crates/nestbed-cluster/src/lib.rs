//! Ephemeral multi-node database clusters on a container runtime.
//!
//! [`Cluster`] drives the lifecycle: network, optional fault-injection
//! sidecar, nodes joined to the bootstrap node, start, connection, cleanup.

pub mod broker;
pub mod cluster;
pub mod factory;
pub mod fault_injection;
pub mod network;
pub mod provisioner;

#[cfg(test)]
pub(crate) mod testing;

pub use broker::{ConnectionBroker, ConnectionHandle, DatabaseConnector, PgConnector};
pub use cluster::{Cluster, ClusterDeps};
pub use factory::create_cluster;
pub use fault_injection::FaultInjectionProxyManager;
pub use network::NetworkManager;
pub use provisioner::NodeProvisioner;
