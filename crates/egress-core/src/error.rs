//! Error types for egress-core
//!
//! Centralized error handling using `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Main error type for egress-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// A `"N"` / `"N-M"` range string could not be parsed
    #[error("Invalid range '{input}': {reason}")]
    InvalidRange {
        /// The rejected input
        input: String,
        /// Which rule was violated
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    ConfigValue {
        /// Configuration key
        key: String,
        /// Error message
        message: String,
    },

    /// Unknown or undecodable WireGuard fake packet mode
    #[error("Incorrect fake packet mode '{mode}': {reason}")]
    InvalidFakePacketMode {
        /// The rejected mode string
        mode: String,
        /// Failure reason
        reason: String,
    },

    /// Feature not available on this platform or build
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// No bindable port found within the probe budget
    #[error("Failed to find an available random port in the range {start}-{end} after {attempts} attempts")]
    NoPortAvailable {
        /// First port of the range
        start: u16,
        /// Last port of the range (inclusive)
        end: u16,
        /// Number of ports probed
        attempts: usize,
    },

    /// TURN client setup or allocation failed
    #[error("TURN relay via '{server}' failed during {stage}: {message}")]
    TurnRelay {
        /// TURN server address
        server: String,
        /// Step that failed (dial, listen, allocate, ...)
        stage: &'static str,
        /// Error message
        message: String,
    },

    /// Address could not be resolved or parsed
    #[error("Invalid address '{addr}': {reason}")]
    InvalidAddress {
        /// The offending address
        addr: String,
        /// Failure reason
        reason: String,
    },

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hex decoding error
    #[error("Hex decoding error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid range error
    pub fn invalid_range(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a config value error
    pub fn config_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a TURN relay error for the given stage
    pub fn turn(server: impl Into<String>, stage: &'static str, message: impl ToString) -> Self {
        Self::TurnRelay {
            server: server.into(),
            stage,
            message: message.to_string(),
        }
    }

    /// Attach the configuration key to a range parse failure
    pub(crate) fn for_key(self, key: &str) -> Self {
        match self {
            Self::InvalidRange { input, reason } => Self::ConfigValue {
                key: key.to_string(),
                message: format!("invalid range '{input}': {reason}"),
            },
            other => other,
        }
    }

    /// Whether this error stems from configuration rather than runtime I/O
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. }
                | Self::Config(_)
                | Self::ConfigValue { .. }
                | Self::InvalidFakePacketMode { .. }
                | Self::Unsupported(_)
                | Self::HexDecode(_)
        )
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::NoPortAvailable { .. } => std::io::Error::new(std::io::ErrorKind::AddrInUse, err),
            other if other.is_config() => std::io::Error::new(std::io::ErrorKind::InvalidInput, other),
            other => std::io::Error::other(other),
        }
    }
}
