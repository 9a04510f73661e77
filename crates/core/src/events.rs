//! Engine-wide change notification
//!
//! Every component publishes its own events. [`EngineEvents`] merges them
//! into one stream so a UI binding needs a single subscription to know when
//! to re-read engine state.

use pageflow_cache::{CacheChange, CollectionId, OverlayChange};
use pageflow_scheduler::{QueueEvent, RequestorEvent};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

/// Something observable about the engine changed
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A collection was opened; all previous state is gone
    CollectionOpened { id: CollectionId, len: usize },
    /// The active collection was closed
    CollectionClosed,
    /// A validated configuration update was applied
    ConfigUpdated { revision: u64 },
    /// The decode backend became ready
    BackendReady,
    Cache(CacheChange),
    Queue(QueueEvent),
    Thumbnail(RequestorEvent),
    Overlay(OverlayChange),
}

/// Merged subscription to every engine event source
pub struct EngineEvents {
    pub(crate) lifecycle: broadcast::Receiver<EngineEvent>,
    pub(crate) cache: broadcast::Receiver<CacheChange>,
    pub(crate) queue: broadcast::Receiver<QueueEvent>,
    pub(crate) thumbnails: broadcast::Receiver<RequestorEvent>,
    pub(crate) overlay: broadcast::Receiver<OverlayChange>,
}

impl EngineEvents {
    /// Wait for the next event from any source
    ///
    /// Events dropped because this subscriber fell behind are skipped.
    /// Returns `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        loop {
            let received = tokio::select! {
                event = self.lifecycle.recv() => event,
                event = self.cache.recv() => event.map(EngineEvent::Cache),
                event = self.queue.recv() => event.map(EngineEvent::Queue),
                event = self.thumbnails.recv() => event.map(EngineEvent::Thumbnail),
                event = self.overlay.recv() => event.map(EngineEvent::Overlay),
            };

            match received {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "engine event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take one already-published event without waiting
    ///
    /// Sources are drained in a fixed order: lifecycle, cache, queue,
    /// thumbnails, overlay.
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        if let Some(event) = take(&mut self.lifecycle) {
            return Some(event);
        }
        if let Some(change) = take(&mut self.cache) {
            return Some(EngineEvent::Cache(change));
        }
        if let Some(event) = take(&mut self.queue) {
            return Some(EngineEvent::Queue(event));
        }
        if let Some(event) = take(&mut self.thumbnails) {
            return Some(EngineEvent::Thumbnail(event));
        }
        take(&mut self.overlay).map(EngineEvent::Overlay)
    }

    /// Every event published so far, in [`try_recv`](Self::try_recv) order
    pub fn drain(&mut self) -> Vec<EngineEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

fn take<T: Clone>(rx: &mut broadcast::Receiver<T>) -> Option<T> {
    loop {
        match rx.try_recv() {
            Ok(value) => return Some(value),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
        }
    }
}
