//! Urge-button poller.
//!
//! The button has no interrupt line available to user space, so a dedicated
//! thread samples the pad register. A falling edge raises
//! [`KeyEvent::Pressed`], then sampling pauses for the debounce window so
//! contact bounce cannot produce a second press. Presses cross into the
//! event loop over an unbounded tokio channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::{HardwareError, Result};
use crate::gpio::{GpioPin, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Pressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay between samples while nothing happens
    pub poll_interval: Duration,
    /// Pause after a press before sampling resumes
    pub debounce: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            debounce: Duration::from_millis(300),
        }
    }
}

/// Outcome of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStep {
    pub pressed: bool,
    /// How long to wait before the next sample
    pub wait: Duration,
}

/// Edge detector behind the poller loop, free of threads and clocks.
#[derive(Debug, Clone)]
pub struct DebounceState {
    timing: PollTiming,
    last: Level,
}

impl DebounceState {
    /// The button is pulled up, so the line is assumed high before the
    /// first sample.
    pub fn new(timing: PollTiming) -> Self {
        Self {
            timing,
            last: Level::High,
        }
    }

    pub fn sample(&mut self, level: Level) -> PollStep {
        let pressed = self.last == Level::High && level == Level::Low;
        self.last = level;
        PollStep {
            pressed,
            wait: if pressed {
                self.timing.debounce
            } else {
                self.timing.poll_interval
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopped,
}

impl PollerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollerState::Idle => "idle",
            PollerState::Running => "running",
            PollerState::Stopped => "stopped",
        }
    }
}

/// Background sampler for one input pin. `Idle → Running → Stopped`;
/// a stopped poller cannot be restarted.
pub struct KeyPoller {
    pin: Arc<GpioPin>,
    timing: PollTiming,
    state: Mutex<PollerState>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl KeyPoller {
    pub fn new(pin: Arc<GpioPin>, timing: PollTiming) -> Self {
        Self {
            pin,
            timing,
            state: Mutex::new(PollerState::Idle),
            stop: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PollerState {
        *self.state.lock()
    }

    /// Spawn the sampling thread; presses are sent to `events`.
    pub fn start(&self, events: UnboundedSender<KeyEvent>) -> Result<()> {
        let mut state = self.state.lock();
        if *state != PollerState::Idle {
            return Err(HardwareError::PollerState(state.as_str()));
        }

        let pin = self.pin.clone();
        let stop = self.stop.clone();
        let timing = self.timing;
        let handle = thread::Builder::new()
            .name("key-poller".to_string())
            .spawn(move || poll_loop(&pin, timing, &stop, &events))?;

        *self.thread.lock() = Some(handle);
        *state = PollerState::Running;
        info!(
            bit = self.pin.bit(),
            poll_ms = timing.poll_interval.as_millis() as u64,
            debounce_ms = timing.debounce.as_millis() as u64,
            "Key poller started"
        );
        Ok(())
    }

    /// Ask the thread to stop and wait for it to exit.
    ///
    /// A sleeping poller is woken, so the wait is one register sample at
    /// most, never a poll or debounce pause. The calling thread blocks for
    /// that long; async callers use [`KeyPoller::shutdown`].
    pub fn stop(&self) {
        if let Some(handle) = self.signal_stop() {
            report_exit(handle.join());
        }
        *self.state.lock() = PollerState::Stopped;
    }

    /// [`KeyPoller::stop`] for async callers: the join runs on the blocking
    /// pool and the runtime keeps going meanwhile.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.signal_stop() {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(joined) => report_exit(joined),
                Err(e) => warn!(error = %e, "Key poller join failed"),
            }
        }
        *self.state.lock() = PollerState::Stopped;
    }

    fn signal_stop(&self) -> Option<JoinHandle<()>> {
        self.stop.store(true, Ordering::Release);
        let handle = self.thread.lock().take()?;
        handle.thread().unpark();
        Some(handle)
    }
}

fn report_exit(joined: thread::Result<()>) {
    if joined.is_err() {
        warn!("Key poller thread panicked");
    }
    info!("Key poller stopped");
}

impl Drop for KeyPoller {
    fn drop(&mut self) {
        if self.state() == PollerState::Running {
            self.stop();
        }
    }
}

fn poll_loop(pin: &GpioPin, timing: PollTiming, stop: &AtomicBool, events: &UnboundedSender<KeyEvent>) {
    let mut debounce = DebounceState::new(timing);
    while !stop.load(Ordering::Acquire) {
        let step = debounce.sample(pin.read());
        if step.pressed {
            debug!(bit = pin.bit(), "Key pressed");
            if events.send(KeyEvent::Pressed).is_err() {
                debug!("Key event receiver gone, poller exiting");
                return;
            }
        }
        pause(step.wait, stop);
    }
}

/// Sleep for `wait` unless stop is requested first.
fn pause(wait: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + wait;
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}
