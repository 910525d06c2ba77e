use std::sync::Arc;

use nestbed_core::types::NetworkHandle;
use nestbed_core::{NestbedError, Result};
use nestbed_runtime::ContainerRuntime;
use tracing::info;

/// Creates and removes the bridged network a cluster's containers share.
pub struct NetworkManager {
    runtime: Arc<dyn ContainerRuntime>,
}

impl NetworkManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub async fn create_network(&self, name: &str) -> Result<NetworkHandle> {
        let id = self
            .runtime
            .create_network(name)
            .await
            .map_err(|e| NestbedError::runtime(format!("network {name}"), e))?;
        info!(network = %name, id = %id, "Created network");
        Ok(NetworkHandle {
            id,
            name: name.to_string(),
        })
    }

    /// Fails while containers are still attached.
    pub async fn remove_network(&self, network: &NetworkHandle) -> Result<()> {
        self.runtime
            .remove_network(&network.id)
            .await
            .map_err(|e| NestbedError::runtime(format!("network {}", network.name), e))?;
        info!(network = %network.name, "Removed network");
        Ok(())
    }
}
