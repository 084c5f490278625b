//! Events that flow through the kiosk event bus.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Unified event type for the kiosk.
///
/// Broker state changes, inbound messages and the physical urge button all
/// end up here so screens only need one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum KioskEvent {
    /// CONNACK with return code 0 received
    BrokerConnected,

    /// Transport closed, refused or failed
    BrokerDisconnected { reason: String },

    /// Inbound PUBLISH
    MessageReceived { topic: String, message: String },

    /// Debounced press of the urge button
    UrgePressed { timestamp: i64 },
}

impl KioskEvent {
    /// Get the event type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::BrokerConnected => "BrokerConnected",
            Self::BrokerDisconnected { .. } => "BrokerDisconnected",
            Self::MessageReceived { .. } => "MessageReceived",
            Self::UrgePressed { .. } => "UrgePressed",
        }
    }

    /// Check if this is a broker connection-state event.
    pub fn is_broker_event(&self) -> bool {
        matches!(self, Self::BrokerConnected | Self::BrokerDisconnected { .. })
    }

    /// Check if this is an inbound message for `topic`.
    pub fn is_message_on(&self, topic: &str) -> bool {
        matches!(self, Self::MessageReceived { topic: t, .. } if t == topic)
    }
}

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Event metadata.
///
/// `sequence` is process-wide and increases in publish order, so consumers
/// can check that events from one source were not reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    pub sequence: u64,
    /// Component that published
    pub source: String,
    pub timestamp: i64,
}

impl EventMetadata {
    /// Create new event metadata.
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            sequence: NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed),
            source: source.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_name() {
        assert_eq!(KioskEvent::BrokerConnected.type_name(), "BrokerConnected");
        let event = KioskEvent::MessageReceived {
            topic: "canteen/service/notify".into(),
            message: "{}".into(),
        };
        assert_eq!(event.type_name(), "MessageReceived");
        assert!(event.is_message_on("canteen/service/notify"));
        assert!(!event.is_broker_event());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(KioskEvent::UrgePressed { timestamp: 5 }).unwrap();
        assert_eq!(json["type"], "UrgePressed");
        assert_eq!(json["timestamp"], 5);
    }

    #[test]
    fn test_metadata_sequence_increases() {
        let a = EventMetadata::new("test");
        let b = EventMetadata::new("test");
        assert!(b.sequence > a.sequence);
    }
}
