//! Daemon JSON-RPC client.
//!
//! Talks to the facade over HTTP POST, one request per call. No connection
//! state to hold beyond the `reqwest::Client` and the daemon's base URL, so
//! unlike a stateful RPC channel this one is cheap to `Clone` and needs no
//! `&mut self` methods.

use anyhow::{anyhow, Result};
use meshd_common::model::{Network, Node, PeerInfo, Sharing, Upgrade};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

/// Client for the meshd JSON-RPC facade
#[derive(Clone)]
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl DaemonClient {
    /// Build a client against `base_url` (e.g. `http://127.0.0.1:8655`).
    pub fn new(base_url: &str, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn call<P: Serialize, R: DeserializeOwned>(&self, method: &str, params: P) -> Result<R> {
        let mut req = self.http.post(&self.base_url).json(&json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        }));
        if let Some(token) = &self.token {
            req = req.query(&[("token", token)]);
        }
        let response: RpcResponse = req
            .send()
            .await
            .map_err(|e| anyhow!("failed to reach daemon at {}: {e}", self.base_url))?
            .json()
            .await?;
        if let Some(e) = response.error {
            return Err(anyhow!("{method} failed: {}", e.message));
        }
        let result = response
            .result
            .ok_or_else(|| anyhow!("{method} returned no result"))?;
        Ok(serde_json::from_value(result)?)
    }

    /// `Networks()`
    pub async fn networks(&self) -> Result<Vec<Network>> {
        self.call("Networks", json!([])).await
    }

    /// `Network(name)`
    pub async fn network(&self, name: &str) -> Result<Network> {
        self.call("Network", json!({ "name": name })).await
    }

    /// `Create(name, subnet)`
    pub async fn create(&self, name: &str, subnet: &str) -> Result<Network> {
        self.call("Create", json!({ "name": name, "subnet": subnet })).await
    }

    /// `Remove(name) -> bool`
    pub async fn remove(&self, name: &str) -> Result<bool> {
        self.call("Remove", json!({ "name": name })).await
    }

    /// `Start(name)`
    pub async fn start(&self, name: &str) -> Result<()> {
        self.call("Start", json!({ "name": name })).await
    }

    /// `Stop(name)`
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.call("Stop", json!({ "name": name })).await
    }

    /// `Peers(name)`
    pub async fn peers(&self, name: &str) -> Result<Vec<PeerInfo>> {
        self.call("Peers", json!({ "name": name })).await
    }

    /// `Peer(name, node)`
    pub async fn peer(&self, name: &str, node: &str) -> Result<PeerInfo> {
        self.call("Peer", json!({ "name": name, "node": node })).await
    }

    /// `Import(sharing) -> bool`
    pub async fn import(&self, sharing: &Sharing) -> Result<bool> {
        self.call("Import", sharing).await
    }

    /// `Share(name)`
    pub async fn share(&self, name: &str) -> Result<Sharing> {
        self.call("Share", json!({ "name": name })).await
    }

    /// `Node(name)`: the self node's own host description.
    pub async fn node(&self, name: &str) -> Result<Node> {
        self.call("Node", json!({ "name": name })).await
    }

    /// `Upgrade(name, update)`
    pub async fn upgrade(&self, name: &str, update: Upgrade) -> Result<Node> {
        self.call("Upgrade", json!({ "name": name, "update": update })).await
    }

    /// `Majordomo(name, lifetime) -> url`
    pub async fn majordomo(&self, name: &str, lifetime: u64) -> Result<String> {
        self.call("Majordomo", json!({ "name": name, "lifetime": lifetime })).await
    }

    /// `Join(url, start)`
    pub async fn join(&self, url: &str, start: bool) -> Result<Sharing> {
        self.call("Join", json!({ "url": url, "start": start })).await
    }
}
