//! Status LED behind a sysfs brightness file.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const MAX_BRIGHTNESS: u8 = 255;
pub const MIN_BRIGHTNESS: u8 = 0;

/// Destination of brightness values.
///
/// Called from the event loop, so implementations must not block.
pub trait BrightnessSink: Send + Sync {
    fn write_brightness(&self, value: u8) -> io::Result<()>;

    /// Human readable target, for logs.
    fn describe(&self) -> String;
}

/// Writes ASCII decimal brightness to a sysfs LED file.
///
/// Values are queued to a `led-writer` thread that applies them in order,
/// so callers on the event loop never wait on the file system. Write
/// errors are logged by that thread. Dropping the sink drains the queue.
#[derive(Debug)]
pub struct SysfsBrightness {
    path: PathBuf,
    tx: Option<UnboundedSender<u8>>,
    writer: Option<thread::JoinHandle<()>>,
}

impl SysfsBrightness {
    pub fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let (tx, rx) = unbounded_channel();
        let writer = {
            let path = path.clone();
            thread::Builder::new()
                .name("led-writer".to_string())
                .spawn(move || write_loop(&path, rx))?
        };
        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_loop(path: &Path, mut rx: UnboundedReceiver<u8>) {
    while let Some(value) = rx.blocking_recv() {
        if let Err(e) = std::fs::write(path, value.to_string()) {
            warn!(value, target_file = %path.display(), error = %e, "LED write failed");
        }
    }
}

impl BrightnessSink for SysfsBrightness {
    fn write_brightness(&self, value: u8) -> io::Result<()> {
        self.tx
            .as_ref()
            .and_then(|tx| tx.send(value).ok())
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "LED writer stopped"))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl Drop for SysfsBrightness {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(writer) = self.writer.take() {
            if writer.join().is_err() {
                warn!(target_file = %self.path.display(), "LED writer thread panicked");
            }
        }
    }
}

/// Logs brightness changes instead of driving hardware.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBrightness;

impl BrightnessSink for TracingBrightness {
    fn write_brightness(&self, value: u8) -> io::Result<()> {
        info!(value, "LED brightness (simulated)");
        Ok(())
    }

    fn describe(&self) -> String {
        "simulated".to_string()
    }
}

struct Inner {
    generation: u64,
    off_pending: bool,
}

fn write_logged(sink: &dyn BrightnessSink, value: u8) {
    match sink.write_brightness(value) {
        Ok(()) => debug!(value, target_file = %sink.describe(), "LED brightness set"),
        Err(e) => warn!(value, target_file = %sink.describe(), error = %e, "LED write failed"),
    }
}

/// Success-flash LED: full brightness now, off again after a delay.
///
/// Write failures are logged and otherwise ignored.
pub struct LedDriver {
    sink: Arc<dyn BrightnessSink>,
    off_delay: Duration,
    inner: Arc<Mutex<Inner>>,
}

impl LedDriver {
    pub fn new(sink: Arc<dyn BrightnessSink>, off_delay: Duration) -> Self {
        Self {
            sink,
            off_delay,
            inner: Arc::new(Mutex::new(Inner {
                generation: 0,
                off_pending: false,
            })),
        }
    }

    pub fn sysfs(path: impl Into<PathBuf>, off_delay: Duration) -> io::Result<Self> {
        Ok(Self::new(Arc::new(SysfsBrightness::new(path)?), off_delay))
    }

    pub fn off_delay(&self) -> Duration {
        self.off_delay
    }

    pub fn is_off_pending(&self) -> bool {
        self.inner.lock().off_pending
    }

    /// Turn the LED off now, dropping any scheduled off.
    pub fn off(&self) {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.off_pending = false;
        write_logged(self.sink.as_ref(), MIN_BRIGHTNESS);
    }

    /// Light the LED and schedule it off after the configured delay.
    ///
    /// A flash while an earlier off is still pending replaces that off, so
    /// the LED stays lit for the full delay after the latest flash.
    pub fn flash_success(&self) -> ScheduledOff {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.off_pending {
                debug!("Rescheduling pending LED off");
            }
            inner.generation += 1;
            inner.off_pending = true;
            write_logged(self.sink.as_ref(), MAX_BRIGHTNESS);
            inner.generation
        };

        let sink = self.sink.clone();
        let shared = self.inner.clone();
        let delay = self.off_delay;
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut inner = shared.lock();
            if inner.generation == generation && inner.off_pending {
                inner.off_pending = false;
                write_logged(sink.as_ref(), MIN_BRIGHTNESS);
            }
        });

        ScheduledOff {
            task,
            generation,
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for LedDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LedDriver")
            .field("sink", &self.sink.describe())
            .field("off_delay", &self.off_delay)
            .finish()
    }
}

/// The deferred LED-off from one [`LedDriver::flash_success`].
pub struct ScheduledOff {
    task: JoinHandle<()>,
    generation: u64,
    inner: Arc<Mutex<Inner>>,
}

impl ScheduledOff {
    /// True while this off is still going to run.
    pub fn is_pending(&self) -> bool {
        let inner = self.inner.lock();
        inner.generation == self.generation && inner.off_pending
    }

    /// Keep the LED lit; this off will not run.
    pub fn cancel(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.generation == self.generation {
                inner.off_pending = false;
            }
        }
        self.task.abort();
    }

    /// Wait until the off task has run (or was cancelled).
    pub async fn wait(self) {
        let _ = self.task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        writes: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn writes(&self) -> Vec<String> {
            self.writes.lock().clone()
        }
    }

    impl BrightnessSink for RecordingSink {
        fn write_brightness(&self, value: u8) -> io::Result<()> {
            self.writes.lock().push(value.to_string());
            Ok(())
        }

        fn describe(&self) -> String {
            "recording".to_string()
        }
    }

    struct FailingSink;

    impl BrightnessSink for FailingSink {
        fn write_brightness(&self, _value: u8) -> io::Result<()> {
            Err(io::Error::from(io::ErrorKind::PermissionDenied))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn led() -> (Arc<RecordingSink>, LedDriver) {
        let sink = Arc::new(RecordingSink::default());
        let driver = LedDriver::new(sink.clone(), Duration::from_millis(3000));
        (sink, driver)
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_writes_max_then_min() {
        let (sink, led) = led();
        let off = led.flash_success();
        assert_eq!(sink.writes(), vec!["255"]);
        assert!(off.is_pending());

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(sink.writes(), vec!["255"]);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(sink.writes(), vec!["255", "0"]);
        assert!(!off.is_pending());
        assert!(!led.is_off_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_flash_reschedules_off() {
        let (sink, led) = led();
        let first = led.flash_success();
        tokio::time::sleep(Duration::from_millis(2000)).await;
        let second = led.flash_success();
        assert!(!first.is_pending());
        assert!(second.is_pending());

        // The first off would have fired at 3000ms.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(sink.writes(), vec!["255", "255"]);

        second.wait().await;
        assert_eq!(sink.writes(), vec!["255", "255", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_off_never_runs() {
        let (sink, led) = led();
        let off = led.flash_success();
        off.cancel();
        assert!(!off.is_pending());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sink.writes(), vec!["255"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_drops_pending() {
        let (sink, led) = led();
        let scheduled = led.flash_success();
        led.off();
        assert!(!scheduled.is_pending());

        scheduled.wait().await;
        assert_eq!(sink.writes(), vec!["255", "0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failures_are_ignored() {
        let led = LedDriver::new(Arc::new(FailingSink), Duration::from_millis(100));
        let off = led.flash_success();
        off.wait().await;
        assert!(!led.is_off_pending());
    }

    #[test]
    fn test_sysfs_writes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brightness");
        let sink = SysfsBrightness::new(path.clone()).unwrap();

        sink.write_brightness(MAX_BRIGHTNESS).unwrap();
        sink.write_brightness(17).unwrap();
        sink.write_brightness(MIN_BRIGHTNESS).unwrap();
        drop(sink);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sysfs_flash_leaves_led_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brightness");
        let led = LedDriver::sysfs(path.clone(), Duration::from_millis(3000)).unwrap();

        led.flash_success().wait().await;
        drop(led);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "0");
    }

    #[tokio::test]
    async fn test_missing_sysfs_path() {
        let led =
            LedDriver::sysfs("/nonexistent/leds/led1/brightness", Duration::from_millis(1)).unwrap();
        led.flash_success().wait().await;
        led.off();
    }
}
