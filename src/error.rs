use std::net::SocketAddr;
use std::path::PathBuf;

/// Errors related to configuration loading and parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid HTTP address `{value}`: {message}")]
    InvalidHttpAddr { value: String, message: String },
}

/// Errors reported by the worker supervisor's control operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("Worker id must not be empty")]
    InvalidId,

    #[error("Invalid executable path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Failed to launch worker `{id}` from {}: {source}", path.display())]
    LaunchFailed {
        id: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to signal worker `{id}` (pid {pid}): {source}")]
    Signal {
        id: String,
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

/// Errors related to the UDP datagram relay.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Invalid target host `{0}`")]
    InvalidHost(String),

    #[error("Invalid target port {0}: must be between 1 and 65535")]
    InvalidPort(i64),

    #[error("Could not resolve `{host}`: {message}")]
    Resolve { host: String, message: String },

    #[error("Failed to send datagram to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl RelayError {
    /// True for errors caused by the caller's input rather than the transport.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyMessage | RelayError::InvalidHost(_) | RelayError::InvalidPort(_)
        )
    }
}

impl SupervisorError {
    /// True for errors caused by the caller's input rather than the OS.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SupervisorError::InvalidId | SupervisorError::InvalidPath { .. }
        )
    }
}
