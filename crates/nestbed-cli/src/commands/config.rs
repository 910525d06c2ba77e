use anyhow::Result;
use std::path::Path;

use nestbed_core::config::{BackendConfig, NestbedConfig};

pub fn run(dir: &Path) -> Result<()> {
    let config_path = NestbedConfig::default_path(dir);
    let config = NestbedConfig::load(&config_path)?;

    println!("Config: {}", config_path.display());
    println!();
    println!("  Nodes:            {}", config.cluster.size);
    println!("  Fault injection:  {}", config.cluster.enable_fault_injection);
    println!("  Backend:          {}", config.backend.kind());
    match &config.backend {
        BackendConfig::Container(spec) => {
            println!("  Image:            {}", spec.image_with_tag());
            println!("  Network:          {}", spec.network_name);
            println!("  Node names:       {}", spec.node_name(0));
            println!(
                "  Ports:            database={}, admin={}",
                spec.database_port, spec.admin_port
            );
        }
    }
    if config.cluster.enable_fault_injection {
        let sidecar = &config.fault_injection;
        println!(
            "  Sidecar:          {} ({}, api port {})",
            sidecar.name,
            sidecar.image_with_tag(),
            sidecar.api_port
        );
    }
    let backoff = &config.connection.backoff;
    println!(
        "  Connect backoff:  {}ms x{} up to {}ms, budget {}",
        backoff.initial_interval_ms,
        backoff.multiplier,
        backoff.max_interval_ms,
        match backoff.max_elapsed() {
            Some(budget) => format!("{}s", budget.as_secs()),
            None => "unbounded".to_string(),
        }
    );
    Ok(())
}
