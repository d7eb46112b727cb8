//! Daemon configuration: the TOML file backing one running `meshd` process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration, loaded from (or defaulted in the absence
/// of) `~/.meshd/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root directory holding one subdirectory per network.
    pub store_path: PathBuf,

    /// Bind address for the JSON-RPC facade (HTTP POST + WS).
    pub rpc_listen: String,

    /// Beacon tuning.
    pub beacon: BeaconConfig,

    /// Internal per-network control API port.
    pub control_port: u16,

    /// Interval at which the supervisor polls fetched peers' `/rpc/nodes`.
    pub nodes_list_interval_secs: u64,

    /// Security/authorization configuration.
    pub security: SecurityConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: meshd_common::default_store_path(),
            rpc_listen: "127.0.0.1:8655".to_string(),
            beacon: BeaconConfig::default(),
            control_port: meshd_common::CONTROL_PORT,
            nodes_list_interval_secs: meshd_common::DEFAULT_NODES_LIST_INTERVAL_SECS,
            security: SecurityConfig::default(),
        }
    }
}

/// Beacon announce/listen tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BeaconConfig {
    pub port: u16,
    pub keepalive_secs: u64,
    pub buffer_size: usize,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            port: meshd_common::BEACON_PORT,
            keepalive_secs: meshd_common::DEFAULT_KEEPALIVE_SECS,
            buffer_size: meshd_common::BEACON_BUFFER_SIZE,
        }
    }
}

/// Authorization configuration for the RPC facade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// When true, loopback connections are no longer implicitly trusted and
    /// every request must carry a valid signed token.
    pub headless: bool,

    /// Path to the majordomo signing key used to mint/verify join tokens.
    pub majordomo_key_path: Option<PathBuf>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            headless: false,
            majordomo_key_path: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to `path`, creating parent directories as needed.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_falls_back_to_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let config = DaemonConfig::load(&path).unwrap();
        assert_eq!(config.control_port, meshd_common::CONTROL_PORT);
    }

    #[test]
    fn save_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = DaemonConfig::default();
        config.control_port = 1700;
        config.security.headless = true;
        config.save(&path).unwrap();

        let loaded = DaemonConfig::load(&path).unwrap();
        assert_eq!(loaded.control_port, 1700);
        assert!(loaded.security.headless);
    }
}
