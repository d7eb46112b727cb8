//! Peer Manager: one cancellable fetch task per discovered link-local
//! address, driven by add/remove requests keyed by `SocketAddr`.
//!
//! A peer starts `Fetched = false`. Its task loops on a fixed retry interval
//! until it manages to pull the remote's self host file over the control
//! API, parse it, and write it into the local [`crate::store::Store`]; at
//! that point it caches the node, flips `Fetched`, emits `PeerJoined`, and
//! exits. Removal cancels the task (whichever state it was in) and emits
//! `PeerLeft`.

use crate::events::{Bus, Event};
use crate::store::Store;
use meshd_common::codec::decode_host;
use meshd_common::model::{Node, NodesResponse};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An add/remove request keyed by the peer's link-local address.
#[derive(Debug, Clone, Copy)]
pub enum PeerRequest {
    Add(SocketAddr),
    Remove(SocketAddr),
}

/// Runtime state of one discovered peer, as returned by [`PeerManager::list`].
#[derive(Debug, Clone)]
pub struct PeerState {
    pub address: SocketAddr,
    pub fetched: bool,
    pub node: Option<Node>,
}

struct Slot {
    token: CancellationToken,
    state: Arc<RwLock<PeerState>>,
}

/// Owns the map of in-flight peer fetch tasks for one network.
pub struct PeerManager {
    network: String,
    control_port: u16,
    store: Store,
    bus: Arc<Bus>,
    http: reqwest::Client,
    retry_interval: Duration,
    peers: RwLock<HashMap<SocketAddr, Slot>>,
}

impl PeerManager {
    pub fn new(network: String, control_port: u16, store: Store, bus: Arc<Bus>) -> Arc<Self> {
        Arc::new(Self {
            network,
            control_port,
            store,
            bus,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            retry_interval: Duration::from_secs(10),
            peers: RwLock::new(HashMap::new()),
        })
    }

    /// Consume `requests` until the channel closes or `token` is cancelled,
    /// applying each add/remove to the peer map.
    pub async fn run(self: Arc<Self>, mut requests: mpsc::Receiver<PeerRequest>, token: CancellationToken) {
        loop {
            tokio::select! {
                maybe_req = requests.recv() => {
                    let Some(req) = maybe_req else { return };
                    match req {
                        PeerRequest::Add(addr) => self.clone().add(addr, token.child_token()).await,
                        PeerRequest::Remove(addr) => self.remove(addr).await,
                    }
                }
                _ = token.cancelled() => {
                    self.cancel_all().await;
                    return;
                }
            }
        }
    }

    async fn add(self: Arc<Self>, addr: SocketAddr, peer_token: CancellationToken) {
        {
            let peers = self.peers.read().await;
            if peers.contains_key(&addr) {
                return;
            }
        }
        let state = Arc::new(RwLock::new(PeerState {
            address: addr,
            fetched: false,
            node: None,
        }));
        self.peers.write().await.insert(
            addr,
            Slot {
                token: peer_token.clone(),
                state: state.clone(),
            },
        );
        self.bus.emit(Event::PeerDiscovered {
            network: self.network.clone(),
            node: None,
            address: addr.to_string(),
        });

        let this = self.clone();
        tokio::spawn(async move {
            this.fetch_loop(addr, state, peer_token).await;
        });
    }

    async fn remove(&self, addr: SocketAddr) {
        let slot = self.peers.write().await.remove(&addr);
        if let Some(slot) = slot {
            slot.token.cancel();
            let node = slot.state.read().await.node.as_ref().map(|n| n.name.clone());
            self.bus.emit(Event::PeerLeft {
                network: self.network.clone(),
                node,
                address: addr.to_string(),
            });
        }
    }

    async fn cancel_all(&self) {
        let mut peers = self.peers.write().await;
        for (_, slot) in peers.drain() {
            slot.token.cancel();
        }
    }

    async fn fetch_loop(&self, addr: SocketAddr, state: Arc<RwLock<PeerState>>, token: CancellationToken) {
        loop {
            match self.fetch_once(addr).await {
                Ok(node) => {
                    let node_name = node.name.clone();
                    {
                        let mut s = state.write().await;
                        s.fetched = true;
                        s.node = Some(node);
                    }
                    self.bus.emit(Event::PeerJoined {
                        network: self.network.clone(),
                        node: node_name,
                        address: addr.to_string(),
                    });
                    return;
                }
                Err(e) => {
                    debug!(%addr, %e, "peer fetch failed, retrying");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = token.cancelled() => return,
            }
        }
    }

    async fn fetch_once(&self, addr: SocketAddr) -> meshd_common::Result<Node> {
        let url = format!("http://{}:{}/", addr.ip(), self.control_port);
        let text = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| meshd_common::Error::Transient(e.to_string()))?
            .error_for_status()
            .map_err(|e| meshd_common::Error::Transient(e.to_string()))?
            .text()
            .await
            .map_err(|e| meshd_common::Error::Transient(e.to_string()))?;
        let host = decode_host(&addr.to_string(), &text);
        self.store.put(&self.network, host.clone()).await?;
        Ok((&host).into())
    }

    /// Currently known peers, sorted by address for stable output.
    pub async fn list(&self) -> Vec<PeerState> {
        let peers = self.peers.read().await;
        let mut out = Vec::with_capacity(peers.len());
        for slot in peers.values() {
            out.push(slot.state.read().await.clone());
        }
        out.sort_by(|a, b| a.address.to_string().cmp(&b.address.to_string()));
        out
    }

    /// Addresses of peers whose host file has already been fetched, used by
    /// the periodic `/rpc/nodes` scrape.
    pub async fn fetched_addresses(&self) -> Vec<SocketAddr> {
        self.list()
            .await
            .into_iter()
            .filter(|p| p.fetched)
            .map(|p| p.address)
            .collect()
    }

    /// Poll one fetched peer's `/rpc/nodes` and apply every returned node
    /// through the store, logging (not propagating) individual failures.
    pub async fn scrape_nodes(&self, addr: SocketAddr) {
        let url = format!("http://{}:{}/rpc/nodes", addr.ip(), self.control_port);
        let result = async {
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| e.to_string())?
                .error_for_status()
                .map_err(|e| e.to_string())?
                .json::<NodesResponse>()
                .await
                .map_err(|e| e.to_string())?;
            Ok::<_, String>(resp)
        }
        .await;

        match result {
            Ok(resp) => {
                for node in resp.nodes {
                    let host = meshd_common::model::HostDescription {
                        name: node.name.clone(),
                        subnet: node.subnet,
                        port: node.port,
                        address: node.address,
                        public_key: node.public_key,
                        version: node.version,
                    };
                    if let Err(e) = self.store.put(&self.network, host).await {
                        debug!(network = %self.network, node = %node.name, %e, "nodes-scrape put failed");
                    }
                }
            }
            Err(e) => warn!(network = %self.network, %addr, %e, "periodic nodes scrape failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use tempfile::TempDir;

    fn addr(octet: u8, port: u16) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(127, 0, 0, octet), port))
    }

    #[tokio::test]
    async fn add_emits_discovered_and_lists_unfetched() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().to_path_buf(), std::path::PathBuf::from("/bin/true"));
        store.configure("office", "10.1.0.0/16").await.unwrap();
        let bus = Bus::new();
        let discovered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let d2 = discovered.clone();
        bus.on_peer_discovered(move |_| {
            d2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let pm = PeerManager::new("office".to_string(), 1655, store, bus);
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let run_token = token.clone();
        let pm2 = pm.clone();
        let handle = tokio::spawn(async move { pm2.run(rx, run_token).await });

        let target = addr(9, 1655);
        tx.send(PeerRequest::Add(target)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(discovered.load(std::sync::atomic::Ordering::SeqCst), 1);
        let listed = pm.list().await;
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].fetched);

        token.cancel();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn remove_emits_peer_left_and_clears_map() {
        let tmp = TempDir::new().unwrap();
        let store = Store::new(tmp.path().to_path_buf(), std::path::PathBuf::from("/bin/true"));
        store.configure("office", "10.1.0.0/16").await.unwrap();
        let bus = Bus::new();
        let left = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let l2 = left.clone();
        bus.on_peer_left(move |_| {
            l2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        let pm = PeerManager::new("office".to_string(), 1655, store, bus);
        let (tx, rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let run_token = token.clone();
        let pm2 = pm.clone();
        let handle = tokio::spawn(async move { pm2.run(rx, run_token).await });

        let target = addr(10, 1655);
        tx.send(PeerRequest::Add(target)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(PeerRequest::Remove(target)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(left.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(pm.list().await.is_empty());

        token.cancel();
        let _ = handle.await;
    }
}
