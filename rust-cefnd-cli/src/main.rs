use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod utils;

/// cefnd control tool
#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    /// Sets the level of verbosity
    #[clap(short, long, global = true)]
    verbose: bool,

    /// Control socket of the daemon
    #[clap(short, long, global = true, default_value = "/tmp/cefnd.ctrl")]
    socket: PathBuf,

    /// Print raw JSON instead of tables
    #[clap(long, global = true)]
    json: bool,

    /// Subcommand to execute
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status, counters, faces and routes
    Status,

    /// Show the Pending Interest Table
    Pit,

    /// Manage the forwarding table (FIB)
    Route {
        #[clap(subcommand)]
        cmd: RouteCommands,
    },

    /// Stop the daemon
    Stop,

    /// Send an Interest through the local socket and print the reply
    Interest {
        /// Name to request
        name: String,

        /// Chunk number
        #[clap(short, long)]
        chunk: Option<u32>,

        /// Timeout in milliseconds
        #[clap(short, long, default_value = "4000")]
        timeout: u64,

        /// Local application socket of the daemon
        #[clap(short, long, default_value = "/tmp/cefnd.sock")]
        local_socket: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum RouteCommands {
    /// Add a route to the FIB
    Add {
        /// Name prefix
        prefix: String,

        /// Transport (udp or tcp)
        protocol: String,

        /// Next hops, host[:port]
        #[clap(required = true)]
        next_hops: Vec<String>,

        /// Route cost
        #[clap(short, long, default_value = "0")]
        cost: u16,
    },

    /// Remove a route from the FIB
    Del {
        /// Name prefix
        prefix: String,

        /// Transport (udp or tcp)
        protocol: String,

        /// Next hops, host[:port]
        #[clap(required = true)]
        next_hops: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "debug" } else { "warn" }
    )).init();

    match cli.command {
        Commands::Status => {
            commands::status::show_status(&cli.socket, cli.json).await?;
        }
        Commands::Pit => {
            commands::pit::show_pit(&cli.socket, cli.json).await?;
        }
        Commands::Route { cmd } => {
            commands::route::handle_command(cmd, &cli.socket).await?;
        }
        Commands::Stop => {
            commands::stop::stop_daemon(&cli.socket).await?;
        }
        Commands::Interest {
            name,
            chunk,
            timeout,
            local_socket,
        } => {
            commands::interest::send_interest(&local_socket, &name, chunk, timeout).await?;
        }
    }

    Ok(())
}
