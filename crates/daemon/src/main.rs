//! meshd
//!
//! Supervises a fleet of local mesh-VPN networks: per-network config store,
//! peer discovery over a UDP beacon, host-file exchange over an internal
//! control API, and a JSON-RPC facade for network lifecycle management.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod beacon;
mod config;
mod control_api;
mod events;
mod majordomo;
mod peer;
mod platform;
mod pool;
mod rpc;
mod store;
mod supervisor;

use config::DaemonConfig;
use events::Bus;
use pool::Pool;
use store::Store;

#[derive(Parser)]
#[command(name = "meshd")]
#[command(about = "Supervises a fleet of local mesh-VPN networks")]
#[command(version)]
struct Cli {
    /// Daemon configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Network store directory, overriding the config file's value
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// JSON-RPC facade bind address, overriding the config file's value
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Run in the foreground (meshd never daemonizes itself; run it under a
    /// process supervisor such as systemd for background operation)
    #[arg(short, long)]
    foreground: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("meshd v{}", meshd_common::VERSION);
    if !cli.foreground {
        info!("not daemonizing; run under a process supervisor for background operation");
    }

    let config_path = cli.config.unwrap_or_else(meshd_common::default_config_path);
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(listen) = cli.listen {
        config.rpc_listen = listen;
    }
    config.save(&config_path)?;

    let engine_binary = platform::discover_engine_binary()?;
    info!(engine = ?engine_binary, "using vpn engine binary");

    let store = Store::new(config.store_path.clone(), engine_binary.clone());
    store.init().await?;

    let bus = Bus::new();
    bus.sink(|kind, event| {
        info!(kind, ?event, "lifecycle event");
    });

    let pool = Pool::new(store, bus, engine_binary, config.clone()).await?;

    let advertise_host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "127.0.0.1".to_string());

    let rpc_state = Arc::new(rpc::RpcState {
        pool: pool.clone(),
        http: reqwest::Client::builder().build()?,
        security: config.security.clone(),
        advertise_host,
    });
    let app = rpc::router(rpc_state);

    let listener = tokio::net::TcpListener::bind(&config.rpc_listen).await?;
    info!(addr = %config.rpc_listen, "RPC facade listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
        result = serve => {
            if let Err(e) = result {
                error!(%e, "RPC facade server error");
            }
        }
    }

    pool.stop().await;
    info!("meshd shutdown complete");
    Ok(())
}
