//! Platform-specific errors

use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    /// A socket option could not be applied
    #[error("Failed to set {option}: {reason}")]
    SocketOption {
        /// Option name, e.g. `SO_MARK`
        option: &'static str,
        /// Error message
        reason: String,
    },

    /// Feature not available on this platform
    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Protect service rejected or dropped the socket
    #[error("Protect via '{path}' failed: {reason}")]
    Protect {
        /// Unix socket path of the protect service
        path: String,
        /// Error message
        reason: String,
    },

    /// Connect did not finish in time
    #[error("Connect to {addr} timed out after {timeout_ms}ms")]
    Timeout {
        /// Destination
        addr: std::net::SocketAddr,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Error from the core crate (configuration, tunnel, ...)
    #[error(transparent)]
    Core(#[from] egress_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Platform result type
pub type Result<T> = std::result::Result<T, PlatformError>;

impl PlatformError {
    /// Create a socket option error from an I/O failure
    pub fn socket_option(option: &'static str, err: impl ToString) -> Self {
        Self::SocketOption {
            option,
            reason: err.to_string(),
        }
    }

    /// Whether this error comes from configuration rather than I/O
    pub fn is_config(&self) -> bool {
        match self {
            Self::Unsupported(_) => true,
            Self::Core(err) => err.is_config(),
            _ => false,
        }
    }
}

impl From<PlatformError> for egress_core::Error {
    fn from(err: PlatformError) -> Self {
        match err {
            PlatformError::Core(err) => err,
            PlatformError::Io(err) => Self::Io(err),
            PlatformError::Unsupported(feature) => Self::Unsupported(feature.to_string()),
            PlatformError::Timeout { .. } => {
                Self::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, err.to_string()))
            }
            other => Self::Io(std::io::Error::other(other.to_string())),
        }
    }
}
