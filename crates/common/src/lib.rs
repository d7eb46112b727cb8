//! meshd Common Library
//!
//! Shared data model, config-file codec and error types used by both the
//! daemon and the CLI.

pub mod codec;
pub mod error;
pub mod model;
pub mod subnet;

pub use error::{Error, Result, RpcError};
pub use model::*;

/// meshd version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Fixed control-API port every network listens on, bound to its own mesh IP.
pub const CONTROL_PORT: u16 = 1655;

/// Fixed beacon announce/listen port.
pub const BEACON_PORT: u16 = 2655;

/// Fixed ASCII payload the beacon broadcasts and filters incoming datagrams against.
pub const BEACON_PAYLOAD: &[u8] = b"meshd i-am-here";

/// Default beacon keep-alive interval, in seconds.
pub const DEFAULT_KEEPALIVE_SECS: u64 = 15;

/// Default beacon receive-buffer size.
pub const BEACON_BUFFER_SIZE: usize = 8192;

/// Default interval at which the supervisor polls fetched peers for `/rpc/nodes`.
pub const DEFAULT_NODES_LIST_INTERVAL_SECS: u64 = 15;

/// Timeout for the "join" RPC, independent of any ambient request context.
pub const JOIN_TIMEOUT_SECS: u64 = 15;

/// Lower/upper bound (exclusive) for randomly generated listen ports.
pub const LISTEN_PORT_RANGE: std::ops::Range<u16> = 30000..65535;

/// Default store path (root directory holding one subdirectory per network).
pub fn default_store_path() -> std::path::PathBuf {
    home_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join(".meshd")
}

/// Default daemon config file path.
pub fn default_config_path() -> std::path::PathBuf {
    default_store_path().join("config.toml")
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(std::path::PathBuf::from)
}
