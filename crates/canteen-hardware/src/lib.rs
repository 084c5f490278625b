//! Kiosk hardware: urge button, buzzer and status LED.
//!
//! The button and the buzzer sit on S5P6818 GPIO banks that are driven
//! directly through `/dev/mem`; the LED goes through its sysfs brightness
//! file.
//!
//! ```text
//! RegisterWindow ─→ GpioPin (input)  ─→ KeyPoller ──channel──→ event loop
//!       │
//!       └────────→ GpioPin (output) ─→ BuzzerDriver
//! sysfs brightness ─────────────────→ LedDriver
//! ```
//!
//! [`HardwareContext`] is the single construction point. Every feature
//! whose resource cannot be acquired is disabled with a warning; nothing in
//! this crate aborts the process.

pub mod buzzer;
pub mod context;
pub mod error;
pub mod gpio;
pub mod key_poller;
pub mod led;
pub mod register;

pub use buzzer::{BuzzerDriver, BuzzerState, BuzzerTiming, ToneHandle};
pub use context::HardwareContext;
pub use error::{HardwareError, Result};
pub use gpio::{Direction, GpioPin, Level};
pub use key_poller::{DebounceState, KeyEvent, KeyPoller, PollStep, PollTiming, PollerState};
pub use led::{BrightnessSink, LedDriver, ScheduledOff, SysfsBrightness, TracingBrightness};
pub use register::{MemoryRegisters, Register, RegisterBlock, WINDOW_SIZE};

#[cfg(unix)]
pub use register::RegisterWindow;
