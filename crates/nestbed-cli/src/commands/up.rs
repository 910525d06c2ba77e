use anyhow::Result;
use std::path::Path;

use nestbed_cluster::{Cluster, create_cluster};
use nestbed_core::config::NestbedConfig;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub async fn run(
    dir: &Path,
    size: Option<usize>,
    fault_injection: bool,
    database: &str,
) -> Result<()> {
    let config = NestbedConfig::load(&NestbedConfig::default_path(dir))?;
    let mut settings = config.cluster;
    if let Some(size) = size {
        settings.size = size;
    }
    settings.enable_fault_injection |= fault_injection;

    let mut cluster = create_cluster(settings, &config).await?;

    // Ctrl-C aborts bring-up between steps and ends the session.
    let shutdown = CancellationToken::new();
    let watcher = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received");
        }
        watcher.cancel();
    });

    if let Err(e) = bring_up(&mut cluster, database, &shutdown).await {
        error!(error = %e, "Cluster bring-up failed; cleaning up");
        if let Err(cleanup) = cluster.cleanup().await {
            error!(error = %cleanup, "Cleanup incomplete");
        }
        return Err(e.into());
    }

    print_summary(&cluster, database);
    println!("\nPress Ctrl-C to tear the cluster down.");
    shutdown.cancelled().await;

    cluster.cleanup().await?;
    println!("Cluster removed.");
    Ok(())
}

async fn bring_up(
    cluster: &mut Cluster,
    database: &str,
    shutdown: &CancellationToken,
) -> nestbed_core::Result<()> {
    cluster.create_with(shutdown).await?;
    cluster.start_with(shutdown).await?;
    cluster.get_connection(database, shutdown).await?;
    Ok(())
}

fn print_summary(cluster: &Cluster, database: &str) {
    println!("\nCluster running with {} node(s):", cluster.nodes().len());
    for node in cluster.nodes() {
        match &node.join_target {
            Some(target) => println!("  - {} (joined {target})", node.name),
            None => println!("  - {} (bootstrap)", node.name),
        }
    }
    if let Some(url) = cluster.connection_url(database) {
        println!("\n  Database:  {url}");
    }
    if let Some(ports) = cluster.exposed_ports() {
        println!("  Admin UI:  http://localhost:{}", ports.admin);
    }
    if let Some(sidecar) = cluster.sidecar() {
        println!("  Toxiproxy: http://{}", sidecar.api_addr());
        for proxy in cluster.proxies().values() {
            println!("    {} -> {}", proxy.listen, proxy.upstream);
        }
    }
}
