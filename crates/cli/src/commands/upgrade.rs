//! `upgrade`: mutate the self node (port, addresses, device) in place.

use anyhow::Result;

use crate::client::DaemonClient;
use crate::output::print_success;
use meshd_common::model::{Address, Upgrade};

#[allow(clippy::too_many_arguments)]
pub async fn upgrade(
    client: &DaemonClient,
    name: &str,
    port: Option<u16>,
    address: Vec<String>,
    device: Option<String>,
) -> Result<()> {
    let addresses = address
        .into_iter()
        .map(|a| match a.rsplit_once(':') {
            Some((host, port)) => Address {
                host: host.to_string(),
                port: port.parse().unwrap_or_default(),
            },
            None => Address { host: a, port: 0 },
        })
        .collect();

    let update = Upgrade {
        subnet: String::new(),
        port: port.unwrap_or_default(),
        address: addresses,
        device: device.unwrap_or_default(),
    };
    let node = client.upgrade(name, update).await?;
    print_success(&format!("upgraded '{}' (now version {})", node.name, node.version));
    Ok(())
}
