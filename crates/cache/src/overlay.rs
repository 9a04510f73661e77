//! Upscale overlay
//!
//! A parallel map of higher-fidelity images keyed by item index. Display
//! reads consult the overlay before the bitmap cache; the overlay never
//! touches base cache entries, and clearing it leaves them as they were.
//!
//! The overlay is fed by ready events from an external upscaling backend.
//! Events carry the collection they were produced for; events for any other
//! collection than the active one are ignored.

use crate::collection::CollectionId;
use crate::notify::Notifier;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Upscale task status reported by the backend
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UpscaleStatus {
    Pending,
    Checking,
    Processing,
    Completed,
    Skipped,
    Failed,
    Cancelled,
}

/// Ready notification from the upscaling backend
///
/// Serialized in camelCase:
///
/// ```json
/// { "collectionId": "/books/a.cbz", "index": 4, "status": "completed",
///   "cachePath": "/cache/up/4.webp", "error": null }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpscaleReadyEvent {
    /// Collection the upscale was produced for
    pub collection_id: CollectionId,

    /// Item index within that collection
    pub index: usize,

    pub status: UpscaleStatus,

    /// Where the upscaled image was written; present on completion
    #[serde(default)]
    pub cache_path: Option<String>,

    /// Backend error message for failed tasks
    #[serde(default)]
    pub error: Option<String>,

    /// Upscaled dimensions, when the backend reports them
    #[serde(default)]
    pub upscaled_size: Option<(u32, u32)>,
}

/// An upscaled image held by the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaledImage {
    pub index: usize,
    pub url: String,
    pub size: Option<(u32, u32)>,
}

/// Mutation published to overlay subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayChange {
    Set { index: usize },
    Cleared { count: usize },
    Enabled(bool),
}

/// Why an upscale event did not change the overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Applied,
    ForeignCollection,
    NotCompleted,
    MissingPath,
    Disabled,
}

struct OverlayState {
    active: Option<CollectionId>,
    enabled: bool,
    entries: HashMap<usize, UpscaledImage>,
}

/// Higher-fidelity images that take display precedence over the base cache
#[derive(Clone)]
pub struct UpscaleOverlay {
    state: Arc<Mutex<OverlayState>>,
    changes: Notifier<OverlayChange>,
}

impl UpscaleOverlay {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(OverlayState {
                active: None,
                enabled: true,
                entries: HashMap::new(),
            })),
            changes: Notifier::new(),
        }
    }

    /// Store an upscaled image for `index`
    pub fn set_upscaled(&self, index: usize, url: impl Into<String>) {
        self.insert(UpscaledImage {
            index,
            url: url.into(),
            size: None,
        });
    }

    fn insert(&self, image: UpscaledImage) {
        let index = image.index;
        self.state.lock().entries.insert(index, image);
        self.changes.emit(OverlayChange::Set { index });
    }

    pub fn has_upscaled(&self, index: usize) -> bool {
        self.state.lock().entries.contains_key(&index)
    }

    pub fn upscaled_url(&self, index: usize) -> Option<String> {
        self.state.lock().entries.get(&index).map(|e| e.url.clone())
    }

    pub fn upscaled(&self, index: usize) -> Option<UpscaledImage> {
        self.state.lock().entries.get(&index).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every overlay entry
    pub fn clear_all_upscaled(&self) {
        let count = Self::clear_locked(&mut self.state.lock());
        self.changes.emit(OverlayChange::Cleared { count });
    }

    fn clear_locked(state: &mut OverlayState) -> usize {
        let count = state.entries.len();
        state.entries.clear();
        count
    }

    /// Set the collection whose events are accepted, dropping all entries
    pub fn set_active_collection(&self, collection: Option<CollectionId>) {
        let count = {
            let mut state = self.state.lock();
            state.active = collection;
            Self::clear_locked(&mut state)
        };
        self.changes.emit(OverlayChange::Cleared { count });
    }

    pub fn active_collection(&self) -> Option<CollectionId> {
        self.state.lock().active.clone()
    }

    /// Turn the overlay on or off; turning it off drops all entries
    pub fn set_enabled(&self, enabled: bool) {
        let (changed, cleared) = {
            let mut state = self.state.lock();
            let changed = std::mem::replace(&mut state.enabled, enabled) != enabled;
            let cleared = (!enabled).then(|| Self::clear_locked(&mut state));
            (changed, cleared)
        };
        if let Some(count) = cleared {
            self.changes.emit(OverlayChange::Cleared { count });
        }
        if changed {
            self.changes.emit(OverlayChange::Enabled(enabled));
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    /// Apply a ready event from the upscaling backend
    ///
    /// The enabled and collection checks and the insert happen under one
    /// lock, so an event can never land after a switch has cleared the map.
    pub fn apply_event(&self, event: &UpscaleReadyEvent) -> EventOutcome {
        let mut state = self.state.lock();
        if !state.enabled {
            return EventOutcome::Disabled;
        }
        if state.active.as_ref() != Some(&event.collection_id) {
            tracing::debug!(
                collection = %event.collection_id,
                index = event.index,
                "ignored upscale event for inactive collection"
            );
            return EventOutcome::ForeignCollection;
        }

        if event.status != UpscaleStatus::Completed {
            if event.status == UpscaleStatus::Failed {
                tracing::warn!(
                    index = event.index,
                    error = event.error.as_deref().unwrap_or("unknown"),
                    "upscale failed"
                );
            }
            return EventOutcome::NotCompleted;
        }

        let Some(path) = event.cache_path.clone() else {
            return EventOutcome::MissingPath;
        };

        state.entries.insert(
            event.index,
            UpscaledImage {
                index: event.index,
                url: path,
                size: event.upscaled_size,
            },
        );
        drop(state);
        self.changes.emit(OverlayChange::Set { index: event.index });
        EventOutcome::Applied
    }

    /// Subscribe to overlay mutations
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayChange> {
        self.changes.subscribe()
    }
}

impl Default for UpscaleOverlay {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(collection: &str, index: usize, path: &str) -> UpscaleReadyEvent {
        UpscaleReadyEvent {
            collection_id: CollectionId::new(collection),
            index,
            status: UpscaleStatus::Completed,
            cache_path: Some(path.to_string()),
            error: None,
            upscaled_size: None,
        }
    }

    #[test]
    fn test_set_and_get_upscaled() {
        let overlay = UpscaleOverlay::new();
        assert!(!overlay.has_upscaled(3));

        overlay.set_upscaled(3, "file:///up/3.webp");
        assert!(overlay.has_upscaled(3));
        assert_eq!(overlay.upscaled_url(3).as_deref(), Some("file:///up/3.webp"));
        assert_eq!(overlay.upscaled_url(4), None);
    }

    #[test]
    fn test_clear_all_upscaled() {
        let overlay = UpscaleOverlay::new();
        let mut changes = overlay.subscribe();
        overlay.set_upscaled(1, "a");
        overlay.set_upscaled(2, "b");

        overlay.clear_all_upscaled();
        assert!(overlay.is_empty());

        assert_eq!(changes.try_recv().unwrap(), OverlayChange::Set { index: 1 });
        assert_eq!(changes.try_recv().unwrap(), OverlayChange::Set { index: 2 });
        assert_eq!(changes.try_recv().unwrap(), OverlayChange::Cleared { count: 2 });
    }

    #[test]
    fn test_event_for_active_collection_applies() {
        let overlay = UpscaleOverlay::new();
        overlay.set_active_collection(Some("book-a".into()));

        let outcome = overlay.apply_event(&completed("book-a", 4, "/cache/4.webp"));
        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(overlay.upscaled_url(4).as_deref(), Some("/cache/4.webp"));
    }

    #[test]
    fn test_event_for_other_collection_ignored() {
        let overlay = UpscaleOverlay::new();
        overlay.set_active_collection(Some("book-b".into()));

        let outcome = overlay.apply_event(&completed("book-a", 4, "/cache/4.webp"));
        assert_eq!(outcome, EventOutcome::ForeignCollection);
        assert!(!overlay.has_upscaled(4));
    }

    #[test]
    fn test_incomplete_events_ignored() {
        let overlay = UpscaleOverlay::new();
        overlay.set_active_collection(Some("book".into()));

        let mut event = completed("book", 1, "/cache/1.webp");
        event.status = UpscaleStatus::Processing;
        assert_eq!(overlay.apply_event(&event), EventOutcome::NotCompleted);

        event.status = UpscaleStatus::Completed;
        event.cache_path = None;
        assert_eq!(overlay.apply_event(&event), EventOutcome::MissingPath);
        assert!(overlay.is_empty());
    }

    #[test]
    fn test_disabling_clears_and_blocks_events() {
        let overlay = UpscaleOverlay::new();
        overlay.set_active_collection(Some("book".into()));
        overlay.set_upscaled(0, "x");

        overlay.set_enabled(false);
        assert!(overlay.is_empty());
        assert_eq!(
            overlay.apply_event(&completed("book", 2, "/cache/2.webp")),
            EventOutcome::Disabled
        );

        overlay.set_enabled(true);
        assert_eq!(
            overlay.apply_event(&completed("book", 2, "/cache/2.webp")),
            EventOutcome::Applied
        );
    }

    #[test]
    fn test_switching_collection_clears_entries() {
        let overlay = UpscaleOverlay::new();
        overlay.set_active_collection(Some("a".into()));
        overlay.set_upscaled(5, "x");

        overlay.set_active_collection(Some("b".into()));
        assert!(overlay.is_empty());
        assert_eq!(overlay.active_collection(), Some(CollectionId::new("b")));
    }

    #[test]
    fn test_event_racing_switch_never_survives_it() {
        for round in 0..200 {
            let overlay = UpscaleOverlay::new();
            overlay.set_active_collection(Some("a".into()));
            let barrier = Arc::new(std::sync::Barrier::new(2));

            let sender = {
                let overlay = overlay.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    (0..8)
                        .map(|index| overlay.apply_event(&completed("a", index, "/cache/a.webp")))
                        .collect::<Vec<_>>()
                })
            };

            barrier.wait();
            overlay.set_active_collection(Some("b".into()));
            let outcomes = sender.join().unwrap();

            assert!(overlay.is_empty(), "round {round}: {outcomes:?}");
            assert!(outcomes
                .iter()
                .all(|o| matches!(o, EventOutcome::Applied | EventOutcome::ForeignCollection)));
        }
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{
            "collectionId": "/books/a.cbz",
            "index": 4,
            "status": "completed",
            "cachePath": "/cache/up/4.webp",
            "error": null
        }"#;
        let event: UpscaleReadyEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.collection_id.as_str(), "/books/a.cbz");
        assert_eq!(event.status, UpscaleStatus::Completed);
        assert_eq!(event.cache_path.as_deref(), Some("/cache/up/4.webp"));
        assert_eq!(event.upscaled_size, None);

        let back = serde_json::to_value(&event).unwrap();
        assert_eq!(back["status"], "completed");
        assert_eq!(back["collectionId"], "/books/a.cbz");
    }
}
