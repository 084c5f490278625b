//! Unified error handling for the kiosk.
//!
//! Library crates keep their own error enums and convert into this one
//! at crate boundaries.

/// Unified error type for the kiosk.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem and device-file errors.
    #[error("IO error: {0}")]
    Io(String),

    /// Socket-level errors.
    #[error("Network error: {0}")]
    Network(String),

    /// Wire-protocol errors.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Register mapping and GPIO errors.
    #[error("Hardware error: {0}")]
    Hardware(String),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

#[macro_export]
macro_rules! config_err {
    ($msg:expr) => {
        $crate::error::Error::Config($msg.into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Config(format!($fmt, $($arg)*))
    };
}

// Error conversion helpers
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_err_macro() {
        let err = config_err!("port must be non-zero");
        assert_eq!(err.to_string(), "Configuration error: port must be non-zero");

        let err = config_err!("pin {} out of range", 40);
        assert!(err.to_string().contains("pin 40 out of range"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
