//! Minimal MQTT 3.1.1 client for the kiosk.
//!
//! Only what the kiosk needs: CONNECT, QoS 0 PUBLISH in both directions,
//! SUBSCRIBE, keep-alive pings and DISCONNECT, over a plain TCP stream.
//!
//! ## Layers
//!
//! - [`codec`]: remaining-length and length-prefixed string encoding
//! - [`packet`]: typed packets with byte-exact `encode`/`decode`
//! - [`decoder`]: reassembles frames from arbitrary read boundaries
//! - [`client`]: [`MqttWireClient`], the connection state machine that
//!   reports into the kiosk event bus
//!
//! ```text
//! connect_to_host ─→ Connecting ─(CONNACK rc=0)─→ Connected
//!        ↑                │                          │
//!        └── Disconnected ←──(refused / EOF / error)─┘
//! ```

pub mod client;
pub mod codec;
pub mod decoder;
pub mod error;
pub mod packet;
pub mod topics;

pub use client::{ConnectionState, MqttClientConfig, MqttWireClient};
pub use decoder::FrameDecoder;
pub use error::{MqttError, Result};
pub use packet::{ConnAck, Connect, ConnectReturnCode, Packet, Publish, SubAck, Subscribe};
