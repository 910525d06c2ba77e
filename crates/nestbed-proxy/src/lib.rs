//! Control plane for the fault-injection sidecar.
//!
//! The sidecar runs Toxiproxy; [`ToxiproxyClient`] speaks its HTTP API and
//! [`ProxyControl`] is the seam the cluster crate depends on.

pub mod control;
pub mod toxiproxy;

pub use control::{Direction, Proxy, ProxyConnector, ProxyControl, Toxic};
pub use toxiproxy::{ToxiproxyClient, ToxiproxyConnector};
