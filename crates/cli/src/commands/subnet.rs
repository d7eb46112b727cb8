//! `subnet add|remove`: (re)point the self node's advertised subnet.
//!
//! The store keeps one active subnet per self node (`Upgrade.subnet`, a
//! no-op when empty — see `Store::upgrade`), not a list of routes, so both
//! verbs are the same underlying call: `add` sets it to the given CIDR,
//! `remove` sets it back to whatever CIDR the caller names (typically the
//! network's originally-configured one).

use anyhow::Result;
use clap::Subcommand;

use crate::client::DaemonClient;
use crate::output::print_success;
use meshd_common::model::Upgrade;

#[derive(Subcommand)]
pub enum SubnetCommands {
    /// Advertise `cidr` as the self node's subnet
    Add {
        /// Network name
        network: String,
        /// CIDR to advertise
        cidr: String,
    },
    /// Reset the self node's subnet back to `cidr`
    Remove {
        /// Network name
        network: String,
        /// CIDR to fall back to
        cidr: String,
    },
}

pub async fn execute(client: &DaemonClient, cmd: SubnetCommands) -> Result<()> {
    match cmd {
        SubnetCommands::Add { network, cidr } => {
            apply(client, &network, &cidr).await?;
            print_success(&format!("'{network}' now advertises subnet {cidr}"));
        }
        SubnetCommands::Remove { network, cidr } => {
            apply(client, &network, &cidr).await?;
            print_success(&format!("'{network}' subnet reset to {cidr}"));
        }
    }
    Ok(())
}

async fn apply(client: &DaemonClient, network: &str, cidr: &str) -> Result<()> {
    let update = Upgrade {
        subnet: cidr.to_string(),
        ..Default::default()
    };
    client.upgrade(network, update).await?;
    Ok(())
}
