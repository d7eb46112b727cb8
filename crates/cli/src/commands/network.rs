//! Network lifecycle commands: `new`, `delete`, `list`, `info`, `start`, `stop`.

use anyhow::Result;
use serde::Serialize;

use crate::client::DaemonClient;
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};
use meshd_common::model::Network;

/// Display wrapper for a [`Network`]
#[derive(Serialize)]
pub struct NetworkDisplay {
    pub name: String,
    pub running: bool,
    pub subnet: String,
    pub port: u16,
    pub interface: String,
}

impl From<Network> for NetworkDisplay {
    fn from(net: Network) -> Self {
        let config = net.config;
        Self {
            name: net.name,
            running: net.running,
            subnet: config.as_ref().map(|c| c.ip.clone()).unwrap_or_default(),
            port: config.as_ref().map(|c| c.port).unwrap_or_default(),
            interface: config.map(|c| c.interface).unwrap_or_default(),
        }
    }
}

impl TableDisplay for NetworkDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["NAME", "RUNNING", "SUBNET", "PORT", "INTERFACE"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.running.to_string(),
            self.subnet.clone(),
            self.port.to_string(),
            self.interface.clone(),
        ]
    }
}

pub async fn list(client: &DaemonClient, format: OutputFormat) -> Result<()> {
    let networks = client.networks().await?;
    let displays: Vec<NetworkDisplay> = networks.into_iter().map(NetworkDisplay::from).collect();
    print_list(&displays, format);
    Ok(())
}

pub async fn info(client: &DaemonClient, name: &str, format: OutputFormat) -> Result<()> {
    let net = client.network(name).await?;
    print_item(&NetworkDisplay::from(net), format);
    Ok(())
}

pub async fn new(client: &DaemonClient, name: &str, subnet: &str, format: OutputFormat) -> Result<()> {
    let net = client.create(name, subnet).await?;
    print_success(&format!("network '{}' created", net.name));
    print_item(&NetworkDisplay::from(net), format);
    Ok(())
}

pub async fn delete(client: &DaemonClient, name: &str) -> Result<()> {
    client.remove(name).await?;
    print_success(&format!("network '{name}' deleted"));
    Ok(())
}

pub async fn start(client: &DaemonClient, name: &str) -> Result<()> {
    client.start(name).await?;
    print_success(&format!("network '{name}' started"));
    Ok(())
}

pub async fn stop(client: &DaemonClient, name: &str) -> Result<()> {
    client.stop(name).await?;
    print_success(&format!("network '{name}' stopped"));
    Ok(())
}
