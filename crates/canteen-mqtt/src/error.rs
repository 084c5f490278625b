//! Error types for the MQTT crate.

use thiserror::Error;

pub use canteen_core::error::Error as KioskError;

/// Result type for MQTT operations.
pub type Result<T> = std::result::Result<T, MqttError>;

/// MQTT error types.
#[derive(Debug, Error)]
pub enum MqttError {
    /// Length does not fit the 4-byte remaining-length encoding.
    #[error("Remaining length {0} exceeds protocol maximum")]
    RemainingLengthTooLarge(usize),

    /// More than four remaining-length bytes carried the continuation bit.
    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    /// String longer than a 16-bit length prefix can describe.
    #[error("String of {0} bytes exceeds 65535")]
    StringTooLong(usize),

    /// Frame body does not match its packet type.
    #[error("Malformed {kind} packet: {reason}")]
    MalformedPacket { kind: &'static str, reason: String },

    /// Inbound frame larger than the decoder accepts.
    #[error("Packet of {0} bytes exceeds maximum packet size")]
    PacketTooLarge(usize),

    /// Publish/subscribe attempted outside the `Connected` state.
    #[error("Not connected")]
    NotConnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MqttError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        MqttError::MalformedPacket {
            kind,
            reason: reason.into(),
        }
    }
}

impl From<MqttError> for KioskError {
    fn from(e: MqttError) -> Self {
        match e {
            MqttError::Io(e) => KioskError::Network(e.to_string()),
            MqttError::NotConnected => KioskError::Network("not connected".to_string()),
            other => KioskError::Protocol(other.to_string()),
        }
    }
}
