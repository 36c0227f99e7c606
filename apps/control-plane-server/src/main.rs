mod config;
mod logging;
mod signals;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use control_plane::{ControlPlane, GrpcHealthProbe, InMemoryConfigDatabase};
use state_store::InMemoryStateStore;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, CliOverrides};

/// Control plane: module registry, config store and admin route registry
#[derive(Parser)]
#[command(name = "control-plane-server")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for the gRPC server
    #[arg(long)]
    grpc_port: Option<u16>,

    /// Port override for the HTTP server
    #[arg(long)]
    http_port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(CliOverrides {
        grpc_port: cli.grpc_port,
        http_port: cli.http_port,
        verbose: cli.verbose,
    });

    if cli.print_config {
        println!("Effective configuration:\n{}", config.to_yaml()?);
        return Ok(());
    }

    logging::init(&config.logging);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");
    println!("Configuration is valid");
    println!("{}", config.to_yaml()?);
    Ok(())
}

async fn run_server(config: AppConfig) -> Result<()> {
    // Standalone mode: shared state and the config database live in
    // process, so HA siblings need an external store behind the same traits.
    let store = InMemoryStateStore::new();
    let db = Arc::new(InMemoryConfigDatabase::default());
    let probe = Arc::new(GrpcHealthProbe::new(&config.control_plane.health));

    let cp = ControlPlane::new(
        config.control_plane,
        Arc::new(store.clone()),
        Arc::new(store),
        db,
        probe,
    );
    tracing::info!(instance = %cp.instance_id(), "control plane starting");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if let Err(e) = signals::wait_for_shutdown().await {
            tracing::error!(error = %e, "signal handling failed");
        }
        on_signal.cancel();
    });

    cp.run(cancel).await
}
