//! Directory-per-network storage: the on-disk source of truth for every
//! network's configuration, keys, generated scripts and peer host files.
//!
//! All mutations go through [`Store`], which serializes writes to a given
//! network behind a per-name lock while letting reads proceed concurrently.

use crate::platform;
use meshd_common::codec::{decode_config, decode_host, encode_config, encode_host};
use meshd_common::model::{ConfigFile, HostDescription};
use meshd_common::subnet::{parse_ipv4_cidr, random_ip};
use meshd_common::{Error, Result, LISTEN_PORT_RANGE};
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// A directory-backed handle to one network. Cheap to construct; carries no
/// open file descriptors.
#[derive(Debug, Clone)]
pub struct Network {
    root: PathBuf,
    name: String,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join("tinc.conf")
    }

    pub fn hosts_dir(&self) -> PathBuf {
        self.root.join("hosts")
    }

    pub fn host_path(&self, node_name: &str) -> PathBuf {
        self.hosts_dir().join(node_name)
    }

    pub fn key_path(&self) -> PathBuf {
        self.root.join("rsa_key.priv")
    }

    pub fn log_path(&self) -> PathBuf {
        self.root.join("log.txt")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.root.join("pid.run")
    }

    pub async fn is_configured(&self) -> bool {
        tokio::fs::try_exists(self.config_path()).await.unwrap_or(false)
    }

    pub async fn read_config(&self) -> Result<ConfigFile> {
        let text = tokio::fs::read_to_string(self.config_path()).await?;
        Ok(decode_config(&text))
    }

    pub async fn read_host(&self, node_name: &str) -> Result<Option<HostDescription>> {
        match tokio::fs::read_to_string(self.host_path(node_name)).await {
            Ok(text) => Ok(Some(decode_host(node_name, &text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_hosts(&self) -> Result<Vec<HostDescription>> {
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.hosts_dir()).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(host) = self.read_host(&name).await? {
                out.push(host);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

/// Validate a network or node name against `[A-Za-z0-9_-]+` (networks allow
/// `-`, node names do not per §3 — callers pick the right validator).
fn validate(name: &str, allow_dash: bool) -> Result<()> {
    let ok = !name.is_empty()
        && name.chars().all(|c| {
            c.is_ascii_alphanumeric() || c == '_' || (allow_dash && c == '-')
        });
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidName(name.to_string()))
    }
}

pub fn validate_network_name(name: &str) -> Result<()> {
    validate(name, true)
}

pub fn validate_node_name(name: &str) -> Result<()> {
    validate(name, false)
}

/// Strip every character outside `[A-Za-z0-9_]` from a network name, per
/// §4.B `get()`.
fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// The directory-per-network store rooted at an absolute directory.
#[derive(Clone)]
pub struct Store {
    root: PathBuf,
    engine_binary: PathBuf,
    locks: Arc<parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl Store {
    pub fn new(root: PathBuf, engine_binary: PathBuf) -> Self {
        Self {
            root,
            engine_binary,
            locks: Arc::new(parking_lot::Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, name: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Create the store root, fixing ownership for the invoking unprivileged
    /// user (see §6 `SUDO_USER`).
    pub async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        platform::fix_owner(&self.root)?;
        Ok(())
    }

    /// List every subdirectory of the root as a [`Network`] handle.
    pub fn list(&self) -> Result<Vec<Network>> {
        let mut out = Vec::new();
        if !self.root.exists() {
            return Ok(out);
        }
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                let name = entry.file_name().to_string_lossy().to_string();
                if validate_network_name(&name).is_ok() {
                    out.push(Network {
                        root: entry.path(),
                        name,
                    });
                }
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Build a handle for `name`, sanitizing it first. Does not require the
    /// network to exist on disk yet.
    pub fn get(&self, name: &str) -> Network {
        let sanitized = sanitize(name);
        Network {
            root: self.root.join(&sanitized),
            name: sanitized,
        }
    }

    /// Remove the whole network directory recursively.
    pub async fn destroy(&self, name: &str) -> Result<()> {
        let net = self.get(name);
        let lock = self.lock_for(net.name());
        let _guard = lock.lock().await;
        match tokio::fs::remove_dir_all(net.dir()).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent initial configuration. Leaves an existing `tinc.conf`
    /// untouched; otherwise generates node name, port, IP and writes the
    /// initial config and self host file at version 1.
    pub async fn configure(&self, name: &str, subnet: &str) -> Result<Network> {
        validate_network_name(name)?;
        let net = self.get(name);
        let lock = self.lock_for(net.name());
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(net.dir()).await?;
        tokio::fs::create_dir_all(net.hosts_dir()).await?;

        if net.is_configured().await {
            debug!(network = net.name(), "already configured, leaving alone");
            return Ok(net);
        }

        let subnet_net = parse_ipv4_cidr(subnet)?;
        let ip = random_ip(&subnet_net)?;
        let node_name = generate_node_name();
        let port = rand::thread_rng().gen_range(LISTEN_PORT_RANGE);

        let config = ConfigFile {
            name: node_name.clone(),
            port,
            interface: default_interface_name(),
            mode: "switch".to_string(),
            auto_start: false,
            device_type: "tap".to_string(),
            device: default_device_path(),
            ip: ip.to_string(),
            mask: subnet_net.prefix() as i64,
            broadcast: "direct".to_string(),
            connect_to: Vec::new(),
        };
        let self_host = HostDescription {
            name: node_name.clone(),
            subnet: format!("{ip}/32"),
            port: config.port,
            address: Vec::new(),
            public_key: String::new(),
            version: 1,
        };

        write_atomic(&net.config_path(), encode_config(&config)).await?;
        write_atomic(&net.host_path(&node_name), encode_host(&self_host)).await?;
        platform::fix_owner(net.dir())?;

        info!(network = net.name(), node = %node_name, %ip, "configured new network");
        Ok(net)
    }

    /// Always-run preparation: scripts, key generation, `ConnectTo`
    /// recomputation, platform post-configuration.
    pub async fn prepare(&self, name: &str) -> Result<()> {
        let net = self.get(name);
        let lock = self.lock_for(net.name());
        let _guard = lock.lock().await;

        platform::write_scripts(&net).await?;

        if !tokio::fs::try_exists(net.key_path()).await.unwrap_or(false) {
            platform::generate_keypair(&self.engine_binary, net.dir()).await?;
        }

        let mut config = net.read_config().await?;
        let connect_to: Vec<String> = net
            .list_hosts()
            .await?
            .into_iter()
            .filter(|h| h.name != config.name && !h.address.is_empty())
            .map(|h| h.name)
            .collect();
        if connect_to != config.connect_to {
            config.connect_to = connect_to;
            write_atomic(&net.config_path(), encode_config(&config)).await?;
        }

        platform::post_configure(&net, &mut config).await?;
        platform::fix_owner(net.dir())?;
        Ok(())
    }

    /// The reconciliation write described in §4.B: accepts `node` only if it
    /// advances a strictly newer version, is not the self node, and its
    /// subnet matches self's.
    pub async fn put(&self, name: &str, node: HostDescription) -> Result<()> {
        if node.name.is_empty() || node.public_key.trim().is_empty() || node.subnet.is_empty() {
            return Err(Error::IncompleteNode(node.name));
        }
        validate_node_name(&node.name)?;

        let net = self.get(name);
        let lock = self.lock_for(net.name());
        let _guard = lock.lock().await;

        let config = net.read_config().await?;
        if node.name == config.name {
            debug!(network = net.name(), node = %node.name, "dropping self-write from peer import");
            return Ok(());
        }

        if let Some(existing) = net.read_host(&node.name).await? {
            if existing.version >= node.version {
                debug!(
                    network = net.name(),
                    node = %node.name,
                    existing = existing.version,
                    incoming = node.version,
                    "dropping stale version"
                );
                return Ok(());
            }
        }

        let self_host = net
            .read_host(&config.name)
            .await?
            .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;
        if self_host.subnet != node.subnet {
            return Err(Error::SubnetMismatch {
                local: self_host.subnet,
                peer: node.subnet,
            });
        }

        write_atomic(&net.host_path(&node.name), encode_host(&node)).await?;
        platform::fix_owner(&net.host_path(&node.name))?;
        Ok(())
    }

    /// Bump the self node's version, optionally replacing address/port/device,
    /// and rewrite both `tinc.conf` and the self host file.
    pub async fn upgrade(
        &self,
        name: &str,
        update: meshd_common::model::Upgrade,
    ) -> Result<HostDescription> {
        let net = self.get(name);
        let lock = self.lock_for(net.name());
        let _guard = lock.lock().await;

        let mut config = net.read_config().await?;
        let mut self_host = net
            .read_host(&config.name)
            .await?
            .ok_or_else(|| Error::Internal(format!("missing self host file for {}", config.name)))?;

        self_host.version += 1;
        if !update.address.is_empty() {
            self_host.address = update.address;
        }
        if update.port != 0 {
            self_host.port = update.port;
            config.port = update.port;
        }
        if !update.device.is_empty() {
            config.device = update.device;
        }
        if !update.subnet.is_empty() {
            self_host.subnet = update.subnet;
        }

        write_atomic(&net.config_path(), encode_config(&config)).await?;
        write_atomic(&net.host_path(&self_host.name), encode_host(&self_host)).await?;
        platform::fix_owner(net.dir())?;

        info!(network = net.name(), version = self_host.version, "upgraded self node");
        Ok(self_host)
    }
}

async fn write_atomic(path: &Path, content: String) -> Result<()> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

fn generate_node_name() -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_lowercase())
        .unwrap_or_else(|_| "node".to_string());
    let hostname: String = hostname
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    let suffix: String = rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(6)
        .map(char::from)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    format!("{hostname}{suffix}")
}

fn default_interface_name() -> String {
    "tinc0".to_string()
}

#[cfg(target_os = "linux")]
fn default_device_path() -> String {
    "/dev/net/tun".to_string()
}

#[cfg(not(target_os = "linux"))]
fn default_device_path() -> String {
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshd_common::model::Address;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> Store {
        Store::new(tmp.path().to_path_buf(), PathBuf::from("/bin/true"))
    }

    #[tokio::test]
    async fn configure_creates_initial_state() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.configure("office", "10.155.0.0/16").await.unwrap();

        let config = net.read_config().await.unwrap();
        assert_eq!(config.mask, 16);
        assert_eq!(config.mode, "switch");
        assert!(config.ip.starts_with("10.155."));

        let hosts = net.list_hosts().await.unwrap();
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].name, config.name);
        assert_eq!(hosts[0].version, 1);
    }

    #[tokio::test]
    async fn configure_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net1 = s.configure("office", "10.155.0.0/16").await.unwrap();
        let config1 = net1.read_config().await.unwrap();
        let _net2 = s.configure("office", "10.0.0.0/8").await.unwrap();
        let config2 = net1.read_config().await.unwrap();
        assert_eq!(config1.name, config2.name);
        assert_eq!(config1.ip, config2.ip);
    }

    #[tokio::test]
    async fn put_with_lower_version_is_noop() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.configure("office", "10.1.0.0/16").await.unwrap();
        let self_host = net.list_hosts().await.unwrap().into_iter().next().unwrap();

        let x_v5 = HostDescription {
            name: "X".to_string(),
            subnet: self_host.subnet.clone(),
            port: 655,
            address: vec![Address {
                host: "1.2.3.4".to_string(),
                port: 655,
            }],
            public_key: "-----BEGIN-----\nk\n-----END-----\n".to_string(),
            version: 5,
        };
        s.put("office", x_v5.clone()).await.unwrap();

        let mut x_v3 = x_v5.clone();
        x_v3.version = 3;
        x_v3.port = 999;
        s.put("office", x_v3).await.unwrap();

        let on_disk = net.read_host("X").await.unwrap().unwrap();
        assert_eq!(on_disk.version, 5);
        assert_eq!(on_disk.port, 655);
    }

    #[tokio::test]
    async fn put_with_mismatched_subnet_fails() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        s.configure("office", "10.1.0.0/16").await.unwrap();

        let bad = HostDescription {
            name: "X".to_string(),
            subnet: "10.2.0.0/16".to_string(),
            port: 655,
            address: vec![],
            public_key: "-----BEGIN-----\nk\n-----END-----\n".to_string(),
            version: 1,
        };
        let err = s.put("office", bad).await.unwrap_err();
        assert!(matches!(err, Error::SubnetMismatch { .. }));
    }

    #[tokio::test]
    async fn put_never_overwrites_self() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.configure("office", "10.1.0.0/16").await.unwrap();
        let self_host = net.list_hosts().await.unwrap().into_iter().next().unwrap();

        let mut forged_self = self_host.clone();
        forged_self.version = 99;
        forged_self.public_key = "-----BEGIN-----\nforged\n-----END-----\n".to_string();
        s.put("office", forged_self).await.unwrap();

        let still_self = net.read_host(&self_host.name).await.unwrap().unwrap();
        assert_eq!(still_self.version, self_host.version);
    }

    #[tokio::test]
    async fn invalid_network_name_rejected() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let err = s.configure("bad name!", "10.1.0.0/16").await.unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[tokio::test]
    async fn upgrade_bumps_version_and_fields() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.configure("office", "10.1.0.0/16").await.unwrap();
        let before = net.list_hosts().await.unwrap().into_iter().next().unwrap();

        let update = meshd_common::model::Upgrade {
            subnet: String::new(),
            port: 7000,
            address: vec![Address {
                host: "203.0.113.9".to_string(),
                port: 7000,
            }],
            device: String::new(),
        };
        let after = s.upgrade("office", update).await.unwrap();
        assert_eq!(after.version, before.version + 1);
        assert_eq!(after.port, 7000);
        assert_eq!(after.address[0].host, "203.0.113.9");
    }

    #[tokio::test]
    async fn destroy_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.configure("office", "10.1.0.0/16").await.unwrap();
        assert!(net.dir().exists());
        s.destroy("office").await.unwrap();
        assert!(!net.dir().exists());
    }

    #[test]
    fn get_sanitizes_name() {
        let tmp = TempDir::new().unwrap();
        let s = store(&tmp);
        let net = s.get("weird/../name!!");
        assert_eq!(net.name(), "weirdname");
    }
}
