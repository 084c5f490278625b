//! Explicit owner of all kiosk hardware.

use std::sync::Arc;
use std::time::Duration;

use canteen_core::HardwareConfig;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{info, warn};

use crate::buzzer::{BuzzerDriver, BuzzerTiming, ToneHandle};
use crate::gpio::GpioPin;
use crate::key_poller::{KeyEvent, KeyPoller, PollTiming, PollerState};
use crate::led::{BrightnessSink, LedDriver, ScheduledOff, SysfsBrightness, TracingBrightness};
use crate::register::{MemoryRegisters, RegisterBlock};

/// Button poller, buzzer and LED built from one [`HardwareConfig`].
///
/// Button and buzzer are optional: a bank that cannot be mapped disables
/// its feature for the lifetime of the context. The LED is always present
/// since its writes already degrade to log lines.
pub struct HardwareContext {
    button: Option<KeyPoller>,
    buzzer: Option<BuzzerDriver>,
    led: LedDriver,
}

impl HardwareContext {
    /// Map the GPIO banks (or simulate them) and start the button poller.
    ///
    /// Key presses arrive on the returned receiver. Without a button the
    /// receiver is already closed.
    pub fn init(config: &HardwareConfig) -> (Self, UnboundedReceiver<KeyEvent>) {
        if config.simulate {
            info!("Hardware simulation enabled, using in-memory registers");
            return Self::with_registers(
                config,
                Some(Arc::new(MemoryRegisters::new())),
                Some(Arc::new(MemoryRegisters::new())),
                Arc::new(TracingBrightness),
            );
        }

        let button_regs = map_bank("button", config.button_base);
        let buzzer_regs = if config.buzzer_base == config.button_base {
            button_regs.clone()
        } else {
            map_bank("buzzer", config.buzzer_base)
        };
        let led_sink: Arc<dyn BrightnessSink> = match SysfsBrightness::new(&config.led_path) {
            Ok(sink) => Arc::new(sink),
            Err(e) => {
                warn!(error = %e, "LED writer unavailable, logging brightness instead");
                Arc::new(TracingBrightness)
            }
        };
        Self::with_registers(config, button_regs, buzzer_regs, led_sink)
    }

    /// Build the context on already available register banks.
    pub fn with_registers(
        config: &HardwareConfig,
        button_regs: Option<Arc<dyn RegisterBlock>>,
        buzzer_regs: Option<Arc<dyn RegisterBlock>>,
        led_sink: Arc<dyn BrightnessSink>,
    ) -> (Self, UnboundedReceiver<KeyEvent>) {
        let led = LedDriver::new(led_sink, Duration::from_millis(config.led_off_delay_ms));
        led.off();

        let buzzer = buzzer_regs.and_then(|regs| match GpioPin::output(regs, config.buzzer_pin) {
            Ok(pin) => Some(BuzzerDriver::new(Arc::new(pin), buzzer_timing(config))),
            Err(e) => {
                warn!(error = %e, "Buzzer disabled");
                None
            }
        });

        let (tx, rx) = unbounded_channel();
        let button = button_regs.and_then(|regs| {
            let pin = match GpioPin::input(regs, config.button_pin) {
                Ok(pin) => pin,
                Err(e) => {
                    warn!(error = %e, "Urge button disabled");
                    return None;
                }
            };
            let poller = KeyPoller::new(Arc::new(pin), poll_timing(config));
            match poller.start(tx) {
                Ok(()) => Some(poller),
                Err(e) => {
                    warn!(error = %e, "Urge button poller failed to start");
                    None
                }
            }
        });

        info!(
            button = button.is_some(),
            buzzer = buzzer.is_some(),
            led = ?led,
            "Hardware initialized"
        );
        (
            Self {
                button,
                buzzer,
                led,
            },
            rx,
        )
    }

    pub fn has_button(&self) -> bool {
        self.button.is_some()
    }

    pub fn has_buzzer(&self) -> bool {
        self.buzzer.is_some()
    }

    pub fn button_state(&self) -> Option<PollerState> {
        self.button.as_ref().map(KeyPoller::state)
    }

    pub fn buzzer(&self) -> Option<&BuzzerDriver> {
        self.buzzer.as_ref()
    }

    pub fn led(&self) -> &LedDriver {
        &self.led
    }

    pub fn flash_led_success(&self) -> ScheduledOff {
        self.led.flash_success()
    }

    /// Play the success tone. `None` when the buzzer is disabled.
    pub fn play_success_sound(&self) -> Option<ToneHandle> {
        self.buzzer.as_ref().map(BuzzerDriver::start)
    }

    /// Stop the button poller and silence the buzzer.
    pub async fn shutdown(&self) {
        if let Some(poller) = self.running_poller() {
            poller.shutdown().await;
        }
        self.silence();
    }

    fn running_poller(&self) -> Option<&KeyPoller> {
        self.button
            .as_ref()
            .filter(|poller| poller.state() == PollerState::Running)
    }

    fn silence(&self) {
        if let Some(buzzer) = &self.buzzer {
            buzzer.silence();
        }
    }
}

impl Drop for HardwareContext {
    // Blocking fallback for a context dropped without `shutdown`.
    fn drop(&mut self) {
        if let Some(poller) = self.running_poller() {
            poller.stop();
        }
        self.silence();
    }
}

fn poll_timing(config: &HardwareConfig) -> PollTiming {
    PollTiming {
        poll_interval: Duration::from_millis(config.poll_interval_ms),
        debounce: Duration::from_millis(config.debounce_ms),
    }
}

fn buzzer_timing(config: &HardwareConfig) -> BuzzerTiming {
    BuzzerTiming {
        tick: Duration::from_millis(config.beep_tick_ms),
        max_ticks: config.beep_ticks,
    }
}

#[cfg(unix)]
fn map_bank(name: &'static str, base: u64) -> Option<Arc<dyn RegisterBlock>> {
    match crate::register::RegisterWindow::map(base) {
        Ok(window) => {
            info!(bank = name, base = format_args!("{:#x}", base), "GPIO bank mapped");
            Some(Arc::new(window))
        }
        Err(e) => {
            warn!(bank = name, error = %e, "GPIO bank unavailable, feature disabled");
            None
        }
    }
}

#[cfg(not(unix))]
fn map_bank(name: &'static str, base: u64) -> Option<Arc<dyn RegisterBlock>> {
    warn!(
        bank = name,
        base = format_args!("{:#x}", base),
        error = %crate::error::HardwareError::Unsupported,
        "GPIO bank unavailable, feature disabled"
    );
    None
}
