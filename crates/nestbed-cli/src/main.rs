mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nestbed")]
#[command(about = "Throwaway multi-node database clusters in containers")]
#[command(version)]
struct Cli {
    /// Directory holding nestbed.toml (default: current directory)
    #[arg(long, global = true, env = "NESTBED_PATH")]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default nestbed.toml
    Init,

    /// Show current configuration
    Config,

    /// Create and start a cluster, then tear it down on Ctrl-C
    Up {
        /// Number of nodes (overrides the config file)
        #[arg(long)]
        size: Option<usize>,

        /// Route node traffic through the fault-injection sidecar
        #[arg(long)]
        fault_injection: bool,

        /// Database to wait for
        #[arg(long, default_value = "")]
        database: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nestbed=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let dir = cli.path.clone().unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Init => commands::init::run(&dir),
        Commands::Config => commands::config::run(&dir),
        Commands::Up {
            size,
            fault_injection,
            ref database,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(commands::up::run(&dir, size, fault_injection, database))
        }
    }
}
