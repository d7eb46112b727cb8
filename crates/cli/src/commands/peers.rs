//! `peers`: list the known/fetched peers of a network.

use anyhow::Result;
use serde::Serialize;

use crate::client::DaemonClient;
use crate::output::{print_list, OutputFormat, TableDisplay};
use meshd_common::model::PeerInfo;

#[derive(Serialize)]
pub struct PeerDisplay {
    pub name: String,
    pub online: bool,
    pub subnet: String,
}

impl From<PeerInfo> for PeerDisplay {
    fn from(p: PeerInfo) -> Self {
        Self {
            name: p.name,
            online: p.online,
            subnet: p.status.map(|s| s.subnet).unwrap_or_default(),
        }
    }
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["NODE", "ONLINE", "SUBNET"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.online.to_string(), self.subnet.clone()]
    }
}

pub async fn peers(client: &DaemonClient, name: &str, format: OutputFormat) -> Result<()> {
    let peers = client.peers(name).await?;
    let displays: Vec<PeerDisplay> = peers.into_iter().map(PeerDisplay::from).collect();
    print_list(&displays, format);
    Ok(())
}
