//! Error types for meshd

use thiserror::Error;

/// Result type alias using meshd's Error
pub type Result<T> = std::result::Result<T, Error>;

/// meshd error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid network name: {0}")]
    InvalidName(String),

    #[error("Network not defined: {0}")]
    NotDefined(String),

    #[error("Network {0} already exists")]
    AlreadyExists(String),

    #[error("Subnet mismatch: local subnet is {local}, peer advertised {peer}")]
    SubnetMismatch { local: String, peer: String },

    #[error("Incomplete host description for {0}: missing subnet or public key")]
    IncompleteNode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Engine process exited unexpectedly: {0}")]
    Fatal(String),

    #[error("Transient failure, retry: {0}")]
    Transient(String),

    #[error("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A minimal JSON-RPC 2.0 error object, independent of any particular
/// RPC transport crate so it can be reused by both the facade and the CLI.
#[derive(Debug, serde::Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        let code = match &e {
            Error::InvalidName(_) => -32001,
            Error::NotDefined(_) => -32002,
            Error::AlreadyExists(_) => -32003,
            Error::SubnetMismatch { .. } => -32004,
            Error::IncompleteNode(_) => -32005,
            Error::InvalidConfig(_) => -32006,
            Error::Timeout { .. } => -32007,
            Error::PermissionDenied(_) => -32008,
            Error::Transient(_) => -32009,
            Error::Fatal(_) => -32010,
            Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => -32000,
        };
        RpcError {
            code,
            message: e.to_string(),
        }
    }
}
