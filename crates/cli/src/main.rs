//! meshctl — thin JSON-RPC client for meshd.
//!
//! Every subcommand here is a 1:1 translation to a facade call; none of
//! them touch a network's on-disk state directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;
mod commands;
mod output;

use client::DaemonClient;
use commands::{join, network, peers, run, share, subnet, upgrade};
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "meshctl")]
#[command(author, version, about = "Control meshd, the mesh-VPN fleet supervisor")]
#[command(propagate_version = true)]
struct Cli {
    /// meshd JSON-RPC facade address
    #[arg(long, default_value = "http://127.0.0.1:8655", global = true)]
    daemon_addr: String,

    /// Majordomo key, required for non-loopback or headless daemons
    #[arg(long, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch meshd in the foreground
    Run {
        /// Daemon config file path
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Enable debug logging in the daemon
        #[arg(short, long)]
        debug: bool,
    },

    /// Create a network
    New {
        /// Network name
        name: String,
        /// CIDR subnet to draw the self IP from
        subnet: String,
    },

    /// Remove a network and its on-disk state
    Delete {
        /// Network name
        name: String,
    },

    /// Redeem an invite link and join the network it describes
    Join {
        /// Invite link minted by `invite`
        link: String,
        /// Start the network immediately after joining
        #[arg(long)]
        start: bool,
    },

    /// Mint an invite link for a network
    Invite {
        /// Network name
        name: String,
        /// Link lifetime, in seconds
        #[arg(long, default_value_t = 3600)]
        lifetime: u64,
    },

    /// List every known network
    List,

    /// Show details for one network
    Info {
        /// Network name
        name: String,
    },

    /// Print (or save) a network's current node set
    Share {
        /// Network name
        name: String,
        /// Write the sharing bundle to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Import a node set from a file produced by `share`
    Import {
        /// Path to a sharing bundle
        file: PathBuf,
    },

    /// Start a network's engine and supporting tasks
    Start {
        /// Network name
        name: String,
    },

    /// Stop a running network
    Stop {
        /// Network name
        name: String,
    },

    /// List a network's peers and their online status
    Peers {
        /// Network name
        name: String,
    },

    /// Mutate the self node's port, addresses or device
    Upgrade {
        /// Network name
        name: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long = "address")]
        address: Vec<String>,
        #[arg(long)]
        device: Option<String>,
    },

    /// Manage the self node's advertised subnet
    #[command(subcommand)]
    Subnet(subnet::SubnetCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    if let Commands::Run { config, debug } = cli.command {
        return run::run(config, debug).await;
    }

    let client = DaemonClient::new(&cli.daemon_addr, cli.token);
    let format = cli.format;

    match cli.command {
        Commands::Run { .. } => unreachable!("handled above"),
        Commands::New { name, subnet } => network::new(&client, &name, &subnet, format).await?,
        Commands::Delete { name } => network::delete(&client, &name).await?,
        Commands::Join { link, start } => join::join(&client, &link, start, format).await?,
        Commands::Invite { name, lifetime } => join::invite(&client, &name, lifetime).await?,
        Commands::List => network::list(&client, format).await?,
        Commands::Info { name } => network::info(&client, &name, format).await?,
        Commands::Share { name, out } => share::share(&client, &name, out.as_deref(), format).await?,
        Commands::Import { file } => share::import(&client, &file).await?,
        Commands::Start { name } => network::start(&client, &name).await?,
        Commands::Stop { name } => network::stop(&client, &name).await?,
        Commands::Peers { name } => peers::peers(&client, &name, format).await?,
        Commands::Upgrade { name, port, address, device } => {
            upgrade::upgrade(&client, &name, port, address, device).await?
        }
        Commands::Subnet(cmd) => subnet::execute(&client, cmd).await?,
    }

    Ok(())
}
