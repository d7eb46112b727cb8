//! Data model shared by the config codec, the store, the supervisor and the
//! JSON-RPC facade.
//!
//! Two families of types live here:
//!  - the on-disk shapes (`ConfigFile`, `HostDescription`, `Address`) that the
//!    codec (see [`crate::codec`]) reads and writes verbatim to `tinc.conf`
//!    and `hosts/<name>`;
//!  - the wire DTOs (`Network`, `Config`, `PeerInfo`, `Peer`, `Node`,
//!    `Sharing`, `Upgrade`) returned and accepted by the JSON-RPC facade.
//!
//! The two families intentionally diverge: the on-disk config carries fields
//! (`mask`, `broadcast`) the facade never exposes directly, and the facade's
//! `Node` carries a `version` the on-disk `HostDescription` also has but
//! under a different serialization (snake_case vs the RPC's camelCase).

use serde::{Deserialize, Serialize};

/// A single address entry: `HOST` or `HOST PORT` once encoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    #[serde(default)]
    pub port: u16,
}

/// The on-disk `tinc.conf` for one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub name: String,
    pub port: u16,
    pub interface: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub auto_start: bool,
    pub device_type: String,
    pub device: String,
    pub ip: String,
    #[serde(default)]
    pub mask: i64,
    #[serde(default)]
    pub broadcast: String,
    #[serde(default)]
    pub connect_to: Vec<String>,
}

fn default_mode() -> String {
    "switch".to_string()
}

/// A single host file: the public description of one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescription {
    pub name: String,
    pub subnet: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub address: Vec<Address>,
    /// PEM-framed public key block; the opaque "tail" of the host file.
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub version: i64,
}

/// Brief or detailed network description returned by the facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    pub running: bool,
    pub config: Option<Config>,
}

/// Wire shape of a network's configuration, as exposed over JSON-RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub name: String,
    pub port: u16,
    pub interface: String,
    #[serde(rename = "autostart")]
    pub auto_start: bool,
    pub mode: String,
    pub ip: String,
    #[serde(rename = "deviceType")]
    pub device_type: String,
    pub device: String,
    #[serde(rename = "connectTo")]
    pub connect_to: Vec<String>,
}

/// Brief per-peer status as returned by `Peers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub online: bool,
    pub status: Option<Peer>,
    pub config: Option<Node>,
}

/// Runtime peer status, mirroring the beacon/fetch state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub node: String,
    pub subnet: String,
    pub fetched: bool,
}

/// Wire shape of a node's host description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    pub subnet: String,
    pub port: u16,
    pub address: Vec<Address>,
    #[serde(rename = "publicKey")]
    pub public_key: String,
    pub version: i64,
}

/// A signed share of a network, exchanged during `Import`/`Share`/`Join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sharing {
    pub name: String,
    pub subnet: String,
    pub nodes: Vec<Node>,
}

/// Body of `GET /rpc/nodes`: every host file currently on disk for a network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesResponse {
    pub nodes: Vec<Node>,
}

/// Requested mutation of the self node, applied by `Upgrade`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Upgrade {
    #[serde(default)]
    pub subnet: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub address: Vec<Address>,
    #[serde(default)]
    pub device: String,
}

impl From<&HostDescription> for Node {
    fn from(h: &HostDescription) -> Self {
        Node {
            name: h.name.clone(),
            subnet: h.subnet.clone(),
            port: h.port,
            address: h.address.clone(),
            public_key: h.public_key.clone(),
            version: h.version,
        }
    }
}

impl From<&ConfigFile> for Config {
    fn from(c: &ConfigFile) -> Self {
        Config {
            name: c.name.clone(),
            port: c.port,
            interface: c.interface.clone(),
            auto_start: c.auto_start,
            mode: c.mode.clone(),
            ip: c.ip.clone(),
            device_type: c.device_type.clone(),
            device: c.device.clone(),
            connect_to: c.connect_to.clone(),
        }
    }
}
