use crate::backoff::BackoffPolicy;
use crate::error::{NestbedError, Result};
use crate::types::{ClusterSettings, ContainerSpec, FaultInjectionConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level nestbed configuration stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NestbedConfig {
    pub cluster: ClusterSettings,
    pub backend: BackendConfig,
    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

/// Runtime backend a cluster is provisioned on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Container(ContainerSpec),
}

impl BackendConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::Container(_) => "container",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Client identifier tag sent with every database connection.
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(flatten)]
    pub backoff: BackoffPolicy,
}

fn default_application_name() -> String {
    "cockroach_testing_client".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            application_name: default_application_name(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl NestbedConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(NestbedError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| NestbedError::TomlDe(e.to_string()))?;
        config.cluster.validate()?;
        config.connection.backoff.validate()?;
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| NestbedError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config for `nestbed init`.
    pub fn default_config() -> Self {
        Self {
            cluster: ClusterSettings::default(),
            backend: BackendConfig::Container(ContainerSpec::default()),
            fault_injection: FaultInjectionConfig::default(),
            connection: ConnectionConfig::default(),
        }
    }

    /// Resolve the config file path: `<dir>/nestbed.toml`
    pub fn default_path(dir: &Path) -> PathBuf {
        dir.join("nestbed.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn roundtrip_config() {
        let tmp = TempDir::new().unwrap();
        let path = NestbedConfig::default_path(tmp.path());
        let config = NestbedConfig::default_config();
        config.save(&path).unwrap();
        let loaded = NestbedConfig::load(&path).unwrap();
        assert_eq!(loaded.cluster, config.cluster);
        assert_eq!(loaded.backend, config.backend);
        assert_eq!(loaded.connection, config.connection);
    }

    #[test]
    fn load_nonexistent_returns_error() {
        let result = NestbedConfig::load(Path::new("/nonexistent/nestbed.toml"));
        assert!(matches!(result, Err(NestbedError::ConfigNotFound(_))));
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let config = NestbedConfig::parse(
            r#"
            [cluster]
            size = 5
            enable_fault_injection = true

            [backend]
            type = "container"
            image = "cockroachdb/cockroach"
            tag = "v23.1.0"
            network_name = "net-a"
            name_prefix = "crdb"
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster.size, 5);
        assert!(config.cluster.enable_fault_injection);
        let BackendConfig::Container(spec) = &config.backend;
        assert_eq!(spec.database_port, 26257);
        assert_eq!(spec.admin_port, 8080);
        assert_eq!(config.fault_injection.name, "toxi");
        assert_eq!(config.connection.backoff.initial_interval_ms, 500);
        assert_eq!(config.connection.application_name, "cockroach_testing_client");
    }

    #[test]
    fn connection_section_overrides_backoff() {
        let config = NestbedConfig::parse(
            r#"
            [cluster]
            size = 1

            [backend]
            type = "container"
            image = "img"
            tag = "t"
            network_name = "n"
            name_prefix = "p"

            [connection]
            max_elapsed_ms = 0
            initial_interval_ms = 20
            "#,
        )
        .unwrap();
        assert_eq!(config.connection.backoff.max_elapsed(), None);
        assert_eq!(config.connection.backoff.initial_interval_ms, 20);
        assert_eq!(config.connection.backoff.multiplier, 1.5);
    }

    #[test]
    fn runaway_multiplier_is_rejected() {
        let result = NestbedConfig::parse(
            r#"
            [cluster]
            size = 1

            [backend]
            type = "container"
            image = "img"
            tag = "t"
            network_name = "n"
            name_prefix = "p"

            [connection]
            multiplier = 1e30
            "#,
        );
        match result {
            Err(NestbedError::Config(message)) => assert!(message.contains("multiplier"), "{message}"),
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_backend_type_is_rejected() {
        let result = NestbedConfig::parse(
            r#"
            [cluster]
            size = 1

            [backend]
            type = "vm"
            "#,
        );
        assert!(matches!(result, Err(NestbedError::TomlDe(_))));
    }

    #[test]
    fn zero_size_cluster_is_rejected() {
        let result = NestbedConfig::parse(
            r#"
            [cluster]
            size = 0

            [backend]
            type = "container"
            image = "img"
            tag = "t"
            network_name = "n"
            name_prefix = "p"
            "#,
        );
        assert!(matches!(result, Err(NestbedError::Config(_))));
    }
}
