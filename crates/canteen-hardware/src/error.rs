//! Error types for the hardware crate.

use std::path::PathBuf;

use thiserror::Error;

pub use canteen_core::error::Error as KioskError;

/// Result type for hardware operations.
pub type Result<T> = std::result::Result<T, HardwareError>;

#[derive(Debug, Error)]
pub enum HardwareError {
    /// Opening the memory device failed, usually for lack of root.
    #[error("Cannot open {path}: {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("mmap of physical address {base:#x} failed: {source}")]
    Map {
        base: u64,
        #[source]
        source: std::io::Error,
    },

    /// Physical base not on a page boundary.
    #[error("Physical address {0:#x} is not page aligned")]
    Unaligned(u64),

    /// Bit index outside a 32-bit register.
    #[error("Invalid GPIO pin {0}")]
    InvalidPin(u8),

    /// The key poller was already started or stopped.
    #[error("Key poller cannot start from state {0}")]
    PollerState(&'static str),

    #[error("Register mapping is not supported on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<HardwareError> for KioskError {
    fn from(e: HardwareError) -> Self {
        KioskError::Hardware(e.to_string())
    }
}
