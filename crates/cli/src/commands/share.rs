//! `share` / `import`: hand a network's node set to another daemon and back.

use anyhow::Result;
use std::path::Path;

use crate::client::DaemonClient;
use crate::output::{print_item, print_success, OutputFormat};
use meshd_common::model::Sharing;

impl crate::output::TableDisplay for Sharing {
    fn headers() -> Vec<&'static str> {
        vec!["NETWORK", "SUBNET", "NODES"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.subnet.clone(), self.nodes.len().to_string()]
    }
}

/// Print the network's current sharing bundle, optionally writing it to `out`.
pub async fn share(client: &DaemonClient, name: &str, out: Option<&Path>, format: OutputFormat) -> Result<()> {
    let sharing = client.share(name).await?;
    if let Some(path) = out {
        std::fs::write(path, serde_json::to_string_pretty(&sharing)?)?;
        print_success(&format!("wrote sharing bundle to {}", path.display()));
    } else {
        print_item(&sharing, format);
    }
    Ok(())
}

/// Import a sharing bundle from a file, creating the network if needed.
pub async fn import(client: &DaemonClient, file: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(file)?;
    let sharing: Sharing = serde_json::from_str(&raw)?;
    let node_count = sharing.nodes.len();
    let name = sharing.name.clone();
    client.import(&sharing).await?;
    print_success(&format!("imported {node_count} node(s) into '{name}'"));
    Ok(())
}
