//! `join` / `invite`: the majordomo signed-link flow.

use anyhow::Result;

use crate::client::DaemonClient;
use crate::output::{print_item, print_success, OutputFormat};

/// Mint an invite link for `name`, valid for `lifetime_secs`.
pub async fn invite(client: &DaemonClient, name: &str, lifetime_secs: u64) -> Result<()> {
    let link = client.majordomo(name, lifetime_secs).await?;
    println!("{link}");
    Ok(())
}

/// Redeem an invite `link`, optionally starting the network once joined.
pub async fn join(client: &DaemonClient, link: &str, start: bool, format: OutputFormat) -> Result<()> {
    let sharing = client.join(link, start).await?;
    print_success(&format!("joined '{}'", sharing.name));
    print_item(&sharing, format);
    Ok(())
}
