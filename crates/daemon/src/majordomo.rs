//! Join flow: the only place this crate talks to the "majordomo" signed-link
//! contract described in SPEC_FULL.md §4.I.
//!
//! Actual signing and verification of links is an opaque external service —
//! out of scope here (see SPEC_FULL.md §1 Out of scope). What this module
//! owns is the *shape* of a link (network name, subnet, and the remote's
//! reachable host/port) and the two RPC operations built on top of it:
//! minting one (`Majordomo`) and consuming one (`Join`).

use crate::pool::Pool;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use meshd_common::model::{Node, Sharing};
use meshd_common::{Error, Result, JOIN_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The decoded shape of a signed link. Real deployments wrap this in a
/// signature envelope minted/verified by the external majordomo service;
/// this struct is the payload that envelope carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkPayload {
    network: String,
    subnet: String,
    host: String,
    port: u16,
    expires_at: i64,
}

fn encode_link(payload: &LinkPayload) -> Result<String> {
    let json = serde_json::to_vec(payload)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_link(link: &str) -> Result<LinkPayload> {
    let bytes = URL_SAFE_NO_PAD
        .decode(link.trim())
        .map_err(|e| Error::InvalidConfig(format!("malformed link: {e}")))?;
    serde_json::from_slice(&bytes).map_err(Error::from)
}

/// Normalize a remote majordomo endpoint to `<scheme>://<host>:<port>/api/`,
/// stripping any existing `/api` suffix first (Open Question 3).
fn normalize_majordomo_url(host: &str, port: u16) -> String {
    let base = if host.contains("://") {
        host.trim_end_matches('/').trim_end_matches("/api").to_string()
    } else {
        format!("http://{host}:{port}")
    };
    format!("{}/api/", base.trim_end_matches('/'))
}

/// `Majordomo(name, lifetime)`: mint a link for `name`, valid for
/// `lifetime_secs` from now.
pub async fn mint(pool: &Arc<Pool>, name: &str, lifetime_secs: u64, advertise_host: &str) -> Result<String> {
    let net = pool.store().get(name);
    let config = net.read_config().await?;
    let self_host = net
        .read_host(&config.name)
        .await?
        .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;

    let payload = LinkPayload {
        network: name.to_string(),
        subnet: self_host.subnet,
        host: advertise_host.to_string(),
        port: config.port,
        expires_at: chrono::Utc::now().timestamp() + lifetime_secs as i64,
    };
    encode_link(&payload)
}

/// `Join(url, start)`: decode the link, create the local network, push our
/// self host to the remote, import what comes back, optionally start.
pub async fn join(pool: &Arc<Pool>, http: &reqwest::Client, link: &str, start: bool) -> Result<Sharing> {
    let payload = decode_link(link)?;
    if payload.expires_at < chrono::Utc::now().timestamp() {
        return Err(Error::InvalidConfig("link has expired".to_string()));
    }

    let supervisor = pool.create(&payload.network, &payload.subnet).await?;
    let net = pool.store().get(&payload.network);
    let config = net.read_config().await?;
    let self_host = net
        .read_host(&config.name)
        .await?
        .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;

    let local_sharing = Sharing {
        name: payload.network.clone(),
        subnet: payload.subnet.clone(),
        nodes: vec![(&self_host).into()],
    };

    let url = normalize_majordomo_url(&payload.host, payload.port);
    info!(network = %payload.network, %url, "joining network via majordomo link");

    let remote_sharing: Sharing = http
        .post(format!("{url}join"))
        .timeout(Duration::from_secs(JOIN_TIMEOUT_SECS))
        .json(&local_sharing)
        .send()
        .await
        .map_err(|e| Error::Transient(e.to_string()))?
        .error_for_status()
        .map_err(|e| Error::Transient(e.to_string()))?
        .json()
        .await
        .map_err(|e| Error::Transient(e.to_string()))?;

    for node in &remote_sharing.nodes {
        import_node(pool, &payload.network, node).await?;
    }

    if start {
        supervisor.start(payload.subnet.clone()).await?;
    }

    Ok(remote_sharing)
}

pub(crate) async fn import_node(pool: &Arc<Pool>, network: &str, node: &Node) -> Result<()> {
    let host = meshd_common::model::HostDescription {
        name: node.name.clone(),
        subnet: node.subnet.clone(),
        port: node.port,
        address: node.address.clone(),
        public_key: node.public_key.clone(),
        version: node.version,
    };
    pool.store().put(network, host).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_round_trips() {
        let payload = LinkPayload {
            network: "office".to_string(),
            subnet: "10.1.0.0/16".to_string(),
            host: "198.51.100.9".to_string(),
            port: 8655,
            expires_at: chrono::Utc::now().timestamp() + 3600,
        };
        let link = encode_link(&payload).unwrap();
        let decoded = decode_link(&link).unwrap();
        assert_eq!(decoded.network, payload.network);
        assert_eq!(decoded.host, payload.host);
        assert_eq!(decoded.port, payload.port);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_link("not-a-real-link!!").is_err());
    }

    #[test]
    fn normalize_strips_existing_api_suffix() {
        assert_eq!(
            normalize_majordomo_url("https://mesh.example.com/api", 8655),
            "https://mesh.example.com/api/"
        );
        assert_eq!(
            normalize_majordomo_url("198.51.100.9", 8655),
            "http://198.51.100.9:8655/api/"
        );
    }
}
