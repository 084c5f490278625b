//! Buzzer tone generation.
//!
//! The buzzer is a plain output pin, so a tone is a square wave produced by
//! toggling the pin from a tokio interval. A tone ends by itself after a
//! fixed number of ticks; the pin is always left low afterwards.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, Instant};
use tracing::{debug, trace};

use crate::gpio::{GpioPin, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzerTiming {
    /// Half period of the square wave
    pub tick: Duration,
    /// The tone stops on the tick that takes the count past this bound
    pub max_ticks: u32,
}

impl Default for BuzzerTiming {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1),
            max_ticks: 150,
        }
    }
}

/// Snapshot of the tone in progress (or the last one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuzzerState {
    pub elapsed_ticks: u32,
    pub level: Level,
    pub running: bool,
}

impl Default for BuzzerState {
    fn default() -> Self {
        Self {
            elapsed_ticks: 0,
            level: Level::Low,
            running: false,
        }
    }
}

struct Inner {
    state: BuzzerState,
    /// Bumped by every start and every cancel; a tone task whose
    /// generation is stale must not touch the pin again.
    generation: u64,
}

impl Inner {
    fn silence(&mut self, pin: &GpioPin) {
        self.generation += 1;
        self.state.running = false;
        self.state.level = Level::Low;
        pin.write(Level::Low);
    }
}

/// Drives the buzzer pin.
pub struct BuzzerDriver {
    pin: Arc<GpioPin>,
    timing: BuzzerTiming,
    inner: Arc<Mutex<Inner>>,
    current: Mutex<Option<AbortHandle>>,
}

impl BuzzerDriver {
    pub fn new(pin: Arc<GpioPin>, timing: BuzzerTiming) -> Self {
        Self {
            pin,
            timing,
            inner: Arc::new(Mutex::new(Inner {
                state: BuzzerState::default(),
                generation: 0,
            })),
            current: Mutex::new(None),
        }
    }

    pub fn timing(&self) -> BuzzerTiming {
        self.timing
    }

    pub fn state(&self) -> BuzzerState {
        self.inner.lock().state
    }

    pub fn is_playing(&self) -> bool {
        self.state().running
    }

    /// Start a tone. A tone still playing is cut off first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> ToneHandle {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state.running {
                debug!("Restarting buzzer tone");
            }
            inner.silence(&self.pin);
            inner.state = BuzzerState {
                elapsed_ticks: 0,
                level: Level::Low,
                running: true,
            };
            inner.generation
        };

        let task = tokio::spawn(run_tone(
            self.pin.clone(),
            self.inner.clone(),
            self.timing,
            generation,
        ));
        if let Some(previous) = self.current.lock().replace(task.abort_handle()) {
            previous.abort();
        }
        debug!(
            bit = self.pin.bit(),
            ticks = self.timing.max_ticks,
            "Buzzer tone started"
        );

        ToneHandle {
            task,
            generation,
            pin: self.pin.clone(),
            inner: self.inner.clone(),
        }
    }

    /// Stop any tone and force the pin low.
    pub fn silence(&self) {
        if let Some(task) = self.current.lock().take() {
            task.abort();
        }
        self.inner.lock().silence(&self.pin);
    }
}

impl Drop for BuzzerDriver {
    fn drop(&mut self) {
        self.silence();
    }
}

/// Handle to one tone started by [`BuzzerDriver::start`].
pub struct ToneHandle {
    task: JoinHandle<()>,
    generation: u64,
    pin: Arc<GpioPin>,
    inner: Arc<Mutex<Inner>>,
}

impl ToneHandle {
    /// True once the tone ran out, was cancelled, or was replaced.
    pub fn is_finished(&self) -> bool {
        let inner = self.inner.lock();
        inner.generation != self.generation || !inner.state.running
    }

    /// Cut the tone short. The pin is left low.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.generation == self.generation && inner.state.running {
                inner.silence(&self.pin);
                debug!("Buzzer tone cancelled");
            }
        }
        self.task.abort();
    }

    /// Wait until the tone task has exited.
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

async fn run_tone(
    pin: Arc<GpioPin>,
    shared: Arc<Mutex<Inner>>,
    timing: BuzzerTiming,
    generation: u64,
) {
    let mut ticker = interval_at(Instant::now() + timing.tick, timing.tick);
    loop {
        ticker.tick().await;

        let mut inner = shared.lock();
        if inner.generation != generation {
            return;
        }
        let level = !inner.state.level;
        inner.state.level = level;
        pin.write(level);
        inner.state.elapsed_ticks += 1;

        if inner.state.elapsed_ticks > timing.max_ticks {
            inner.state.running = false;
            inner.state.level = Level::Low;
            pin.write(Level::Low);
            trace!(ticks = inner.state.elapsed_ticks, "Buzzer tone finished");
            return;
        }
    }
}
