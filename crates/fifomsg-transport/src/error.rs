use std::path::PathBuf;

use crate::timeout::WaitTimeout;

/// Errors that can occur in pipe transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to create the channel at the specified path.
    #[error("failed to create {path}: {source}")]
    Create {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to open an existing channel.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to connect to a listening endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The endpoint name does not fit the platform budget.
    #[error("pipe name too long ({len} bytes, max {max}): {name}")]
    NameTooLong {
        name: String,
        len: usize,
        max: usize,
    },

    /// The endpoint name cannot be represented on this platform.
    #[error("invalid pipe name: {0:?}")]
    InvalidName(String),

    /// A bounded wait elapsed before the channel became ready.
    #[error("timed out after {0}")]
    Timeout(WaitTimeout),

    /// An I/O error occurred on an open channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
