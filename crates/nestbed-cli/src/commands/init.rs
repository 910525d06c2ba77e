use anyhow::Result;
use std::path::Path;

use nestbed_core::config::NestbedConfig;

pub fn run(dir: &Path) -> Result<()> {
    let config_path = NestbedConfig::default_path(dir);
    if config_path.exists() {
        println!("Config already exists at {}", config_path.display());
        return Ok(());
    }

    NestbedConfig::default_config().save(&config_path)?;
    println!("Created config: {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Adjust cluster size and images in {}", config_path.display());
    println!("  2. Run `nestbed up` to start a cluster");
    Ok(())
}
