//! Change notification fan-out
//!
//! UI bindings subscribe to a [`Notifier`] and receive one message per
//! mutation. Sending never blocks and never fails when nobody listens.

use tokio::sync::broadcast;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast publisher for change events
#[derive(Debug, Clone)]
pub struct Notifier<T: Clone> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> Notifier<T> {
    /// Create a notifier with the default backlog
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a notifier keeping up to `capacity` unread events per subscriber
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current subscriber
    pub fn emit(&self, event: T) {
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}
