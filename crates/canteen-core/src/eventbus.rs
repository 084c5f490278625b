//! Event bus for the kiosk event loop.
//!
//! Every component that reports something (broker client, key poller
//! forwarder) publishes here, and screens subscribe. Events are delivered
//! to each subscriber in the order they were published.
//!
//! Each subscriber owns a bounded queue. Publishing waits for room in every
//! live queue, so a burst is held back at the publisher instead of
//! overwriting events the subscriber has not read yet. A subscriber that
//! stops reading therefore stalls publishers; drop the receiver to leave
//! the bus.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::event::{EventMetadata, KioskEvent};

/// Default per-subscriber queue capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

type Envelope = (KioskEvent, EventMetadata);

/// Event bus fanning out to one bounded queue per subscriber.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::Sender<Envelope>>>>,
    capacity: usize,
    name: String,
}

impl EventBus {
    /// Create a new event bus with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new event bus with the specified capacity.
    ///
    /// The capacity is how many unread events each subscriber may have
    /// queued before publishers wait.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            name: "default".to_string(),
        }
    }

    /// Create a new event bus with a name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::new()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of current subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Publish an event from the `system` source.
    ///
    /// Returns `true` if there was at least one subscriber.
    pub async fn publish(&self, event: KioskEvent) -> bool {
        self.publish_with_source(event, "system").await
    }

    /// Publish an event with a custom source.
    ///
    /// Waits while any subscriber's queue is full.
    pub async fn publish_with_source(&self, event: KioskEvent, source: impl Into<String>) -> bool {
        let metadata = EventMetadata::new(source);
        tracing::trace!(bus = %self.name, event = event.type_name(), seq = metadata.sequence, "publish");

        let subscribers = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|tx| !tx.is_closed());
            subscribers.clone()
        };

        let mut delivered = false;
        for tx in subscribers {
            if tx.send((event.clone(), metadata.clone())).await.is_ok() {
                delivered = true;
            }
        }
        delivered
    }

    /// Subscribe to all events published from now on.
    pub fn subscribe(&self) -> EventBusReceiver {
        EventBusReceiver {
            rx: self.register(),
        }
    }

    /// Subscribe to events matching a filter.
    ///
    /// Events the filter rejects are discarded as the receiver reads.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredReceiver<F>
    where
        F: Fn(&KioskEvent) -> bool + Send + 'static,
    {
        FilteredReceiver {
            rx: self.register(),
            filter,
        }
    }

    fn register(&self) -> mpsc::Receiver<Envelope> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.subscribers.lock().push(tx);
        rx
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver for all events from the event bus.
pub struct EventBusReceiver {
    rx: mpsc::Receiver<Envelope>,
}

impl EventBusReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once every handle to the bus is gone.
    pub async fn recv(&mut self) -> Option<(KioskEvent, EventMetadata)> {
        self.rx.recv().await
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<(KioskEvent, EventMetadata)> {
        self.rx.try_recv().ok()
    }
}

/// Receiver for filtered events from the event bus.
pub struct FilteredReceiver<F>
where
    F: Fn(&KioskEvent) -> bool + Send,
{
    rx: mpsc::Receiver<Envelope>,
    filter: F,
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&KioskEvent) -> bool + Send,
{
    /// Receive the next event matching the filter.
    pub async fn recv(&mut self) -> Option<(KioskEvent, EventMetadata)> {
        while let Some((event, meta)) = self.rx.recv().await {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }

    /// Try to receive a matching event without blocking.
    pub fn try_recv(&mut self) -> Option<(KioskEvent, EventMetadata)> {
        while let Ok((event, meta)) = self.rx.try_recv() {
            if (self.filter)(&event) {
                return Some((event, meta));
            }
        }
        None
    }
}
