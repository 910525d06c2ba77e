use std::sync::Arc;

use nestbed_core::config::{BackendConfig, NestbedConfig};
use nestbed_core::ports::HostPortAllocator;
use nestbed_core::types::ClusterSettings;
use nestbed_core::{NestbedError, Result};
use nestbed_proxy::ToxiproxyConnector;
use nestbed_runtime::DockerRuntime;
use tracing::info;

use crate::broker::PgConnector;
use crate::cluster::{Cluster, ClusterDeps};

/// Build an uninitialized cluster on the backend selected in `config`.
///
/// `settings` usually comes from `config.cluster`, possibly overridden on the
/// command line.
pub async fn create_cluster(settings: ClusterSettings, config: &NestbedConfig) -> Result<Cluster> {
    settings.validate()?;
    match &config.backend {
        BackendConfig::Container(spec) => {
            let runtime = DockerRuntime::connect()
                .await
                .map_err(|e| NestbedError::runtime("docker daemon", e))?;
            info!(backend = config.backend.kind(), "Using container backend");
            let deps = ClusterDeps {
                runtime: Arc::new(runtime),
                ports: Arc::new(HostPortAllocator::new()),
                proxies: Arc::new(ToxiproxyConnector),
                database: Arc::new(PgConnector::default()),
            };
            Cluster::new(
                settings,
                spec.clone(),
                config.fault_injection.clone(),
                config.connection.clone(),
                deps,
            )
        }
    }
}
