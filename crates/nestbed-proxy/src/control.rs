use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// A proxy route registered on the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub name: String,
    pub listen: String,
    pub upstream: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Proxy {
    pub fn new(name: &str, listen: &str, upstream: &str) -> Self {
        Self {
            name: name.to_string(),
            listen: listen.to_string(),
            upstream: upstream.to_string(),
            enabled: true,
        }
    }
}

/// Traffic direction a toxic applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upstream,
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upstream => write!(f, "upstream"),
            Direction::Downstream => write!(f, "downstream"),
        }
    }
}

/// A traffic degradation attached to a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Toxic {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub stream: Direction,
    /// Probability the toxic applies to a connection (0.0 - 1.0).
    pub toxicity: f32,
    pub attributes: serde_json::Value,
}

impl Toxic {
    /// Delay every chunk of data by `latency_ms` ± `jitter_ms`.
    pub fn latency(latency_ms: u64, jitter_ms: u64, stream: Direction) -> Self {
        Self {
            name: format!("latency_{stream}"),
            kind: "latency".to_string(),
            stream,
            toxicity: 1.0,
            attributes: json!({ "latency": latency_ms, "jitter": jitter_ms }),
        }
    }

    /// Stop all data and close the connection after `timeout_ms` (0 = never close).
    /// A zero timeout is how partitions are simulated.
    pub fn timeout(timeout_ms: u64, stream: Direction) -> Self {
        Self {
            name: format!("timeout_{stream}"),
            kind: "timeout".to_string(),
            stream,
            toxicity: 1.0,
            attributes: json!({ "timeout": timeout_ms }),
        }
    }

    /// Limit throughput to `rate_kb` KB/s.
    pub fn bandwidth(rate_kb: u64, stream: Direction) -> Self {
        Self {
            name: format!("bandwidth_{stream}"),
            kind: "bandwidth".to_string(),
            stream,
            toxicity: 1.0,
            attributes: json!({ "rate": rate_kb }),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_toxicity(mut self, toxicity: f32) -> Self {
        self.toxicity = toxicity.clamp(0.0, 1.0);
        self
    }
}

/// Control API of a running fault-injection sidecar.
#[async_trait]
pub trait ProxyControl: Send + Sync {
    /// Register a route from `listen` to `upstream`.
    async fn create_proxy(&self, name: &str, listen: &str, upstream: &str)
        -> anyhow::Result<Proxy>;

    /// Enable or disable a proxy; a disabled proxy drops all connections.
    async fn set_enabled(&self, name: &str, enabled: bool) -> anyhow::Result<Proxy>;

    async fn add_toxic(&self, proxy: &str, toxic: &Toxic) -> anyhow::Result<Toxic>;

    async fn remove_toxic(&self, proxy: &str, toxic: &str) -> anyhow::Result<()>;

    /// Re-enable every proxy and drop every toxic.
    async fn reset(&self) -> anyhow::Result<()>;
}

/// Builds a control client for a sidecar whose API listens on `api_addr` (`host:port`).
pub trait ProxyConnector: Send + Sync {
    fn connect(&self, api_addr: &str) -> anyhow::Result<Arc<dyn ProxyControl>>;
}
