//! Core types shared by the canteen kiosk crates.
//!
//! This crate holds the pieces every other crate leans on: the unified
//! error type, the configuration model, the kiosk event enum and the
//! event bus that carries those events around the single event loop.

pub mod config;
pub mod error;
pub mod event;
pub mod eventbus;

pub use config::{HardwareConfig, KioskConfig, KioskSettings, MqttSettings};
pub use error::{Error, Result};
pub use event::{EventMetadata, KioskEvent};
pub use eventbus::{EventBus, EventBusReceiver, FilteredReceiver, DEFAULT_CHANNEL_CAPACITY};

