//! cefnd: the named-data forwarding daemon.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use rust_cefnd_fwd::{Daemon, ForwarderConfig};
use std::path::PathBuf;

/// Named-data forwarding daemon
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Override the UDP/TCP listening port
    #[clap(short, long)]
    port: Option<u16>,

    /// Override the static route file
    #[clap(short, long)]
    routes: Option<PathBuf>,

    /// Override the forwarding strategy
    #[clap(short, long)]
    strategy: Option<String>,

    /// Print the effective configuration as JSON and exit
    #[clap(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "debug" } else { "info" }
    )).init();

    let mut config = ForwarderConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(routes) = cli.routes {
        config.routes_file = Some(routes);
    }
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }
    config.validate().context("Invalid configuration")?;

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let mut daemon = Daemon::new(config).context("Failed to initialise the forwarder")?;
    if let Err(e) = daemon.start().await {
        error!("Startup failed: {}", e);
        return Err(e).context("Failed to start the forwarder");
    }

    let handle = daemon.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping");
            handle.graceful_stop();
        }
    });

    daemon.run().await.context("Forwarder failed")?;
    Ok(())
}
