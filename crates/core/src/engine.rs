//! The prefetch engine
//!
//! One explicitly constructed context object per reading session or window.
//! It owns the bitmap cache, the blob pool, the upscale overlay, the render
//! queue and the thumbnail requestor, and is the only surface the UI talks
//! to:
//!
//! - navigation reports the focus with [`PrefetchEngine::notify_focus`]
//! - grids report what they show with [`PrefetchEngine::notify_visible_range`]
//! - drawing asks [`PrefetchEngine::lookup`] for the best image of an item
//!
//! Opening a collection invalidates everything that belonged to the previous
//! one: queued work is cancelled, in-flight decodes are discarded when they
//! finish and the overlay only accepts events for the new collection.

use crate::error::EngineError;
use crate::events::{EngineEvent, EngineEvents};
use pageflow_cache::{
    BackendReadiness, BitmapCache, BlobPool, ByteSourceResolver, CacheEntry, CacheResult,
    CacheStats, Collection, ConfigError, DecodeBackend, EngineConfig, EventOutcome, Notifier,
    PoolStats, PooledImage, SharedConfig, UpscaleOverlay, UpscaleReadyEvent, UpscaledImage,
};
use pageflow_scheduler::{
    ProgressiveState, QueueStats, QueueStatus, RenderQueue, ThumbnailBatch, ThumbnailRequestor,
    Tier,
};
use std::sync::Arc;
use tokio::runtime::Handle;

/// The best available image for an item
#[derive(Debug, Clone)]
pub enum Displayable {
    /// A higher-fidelity upscaled image from the overlay
    Upscaled(UpscaledImage),

    /// A decoded bitmap from the cache
    Bitmap(CacheEntry),

    /// Undecoded bytes from the blob pool, for surfaces that decode themselves
    Source(Arc<PooledImage>),
}

impl Displayable {
    pub fn index(&self) -> usize {
        match self {
            Displayable::Upscaled(image) => image.index,
            Displayable::Bitmap(entry) => entry.index,
            Displayable::Source(image) => image.index,
        }
    }

    pub fn is_upscaled(&self) -> bool {
        matches!(self, Displayable::Upscaled(_))
    }
}

/// Prefetch and decode cache engine
///
/// # Example
///
/// ```no_run
/// use pageflow_cache::{Collection, EngineConfig, FileListResolver, ImageDecoder};
/// use pageflow_core::PrefetchEngine;
/// use std::sync::Arc;
///
/// # async fn demo(paths: Vec<std::path::PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
/// let len = paths.len();
/// let engine = PrefetchEngine::new(
///     Arc::new(FileListResolver::new(paths)),
///     Arc::new(ImageDecoder),
///     EngineConfig::default(),
/// )?;
///
/// engine.open_collection(Collection::pages("book", len));
/// engine.notify_focus(0);
///
/// if let Some(image) = engine.lookup(0) {
///     println!("item {} ready", image.index());
/// }
/// # Ok(())
/// # }
/// ```
pub struct PrefetchEngine {
    config: SharedConfig,
    readiness: BackendReadiness,
    cache: BitmapCache,
    pool: BlobPool,
    overlay: UpscaleOverlay,
    queue: RenderQueue,
    thumbnails: ThumbnailRequestor,
    events: Notifier<EngineEvent>,
}

impl PrefetchEngine {
    /// Create an engine whose decode backend is ready immediately
    ///
    /// Background work runs on the runtime this is called from.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate or if there is no
    /// current tokio runtime.
    pub fn new(
        resolver: Arc<dyn ByteSourceResolver>,
        backend: Arc<dyn DecodeBackend>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        Self::with_readiness(resolver, backend, config, BackendReadiness::ready())
    }

    /// Create an engine whose decodes wait for `readiness`
    ///
    /// Decodes requested before [`mark_backend_ready`](Self::mark_backend_ready)
    /// wait up to the configured readiness timeout and then fail with
    /// [`CacheError::BackendUnavailable`](pageflow_cache::CacheError::BackendUnavailable).
    pub fn with_readiness(
        resolver: Arc<dyn ByteSourceResolver>,
        backend: Arc<dyn DecodeBackend>,
        config: EngineConfig,
        readiness: BackendReadiness,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        Self::on_runtime(runtime, resolver, backend, config, readiness)
    }

    /// Create an engine whose background work runs on `runtime`
    ///
    /// Every notification method may then be called from any thread,
    /// including a UI thread that is not part of the runtime.
    pub fn on_runtime(
        runtime: Handle,
        resolver: Arc<dyn ByteSourceResolver>,
        backend: Arc<dyn DecodeBackend>,
        config: EngineConfig,
        readiness: BackendReadiness,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let cache = BitmapCache::with_readiness(backend, config.cache_capacity, readiness.clone());
        cache.set_readiness_timeout(config.readiness_timeout());
        let pool = BlobPool::new(resolver, config.pool_capacity, config.pool_batch_size);
        pool.set_max_bytes(config.pool_max_bytes);
        let shared = SharedConfig::new(config);

        let queue = RenderQueue::new(cache.clone(), pool.clone(), shared.clone(), runtime.clone());
        let thumbnails = ThumbnailRequestor::new(cache.clone(), pool.clone(), shared.clone(), runtime);

        Ok(Self {
            config: shared,
            readiness,
            cache,
            pool,
            overlay: UpscaleOverlay::new(),
            queue,
            thumbnails,
            events: Notifier::new(),
        })
    }

    /// Switch to `collection`, dropping everything from the previous one
    pub fn open_collection(&self, collection: Collection) {
        let id = collection.id().clone();
        let len = collection.len();

        self.pool.switch_collection(collection);
        self.invalidate();
        self.overlay.set_active_collection(Some(id.clone()));

        tracing::info!(collection = %id, len, "collection opened");
        self.events.emit(EngineEvent::CollectionOpened { id, len });
    }

    /// Close the active collection
    pub fn close_collection(&self) {
        self.pool.close_collection();
        self.invalidate();
        self.overlay.set_active_collection(None);

        tracing::info!("collection closed");
        self.events.emit(EngineEvent::CollectionClosed);
    }

    fn invalidate(&self) {
        self.queue.reset();
        self.thumbnails.reset();
        self.cache.clear();
    }

    /// The collection currently open
    pub fn collection(&self) -> Option<Collection> {
        self.pool.collection()
    }

    /// The best image available for `index` right now
    ///
    /// Checks the upscale overlay, then the bitmap cache, then the blob
    /// pool. Never starts any work; a bitmap hit counts as a use for LRU.
    pub fn lookup(&self, index: usize) -> Option<Displayable> {
        if let Some(image) = self.overlay.upscaled(index) {
            return Some(Displayable::Upscaled(image));
        }
        if let Some(entry) = self.cache.get(index) {
            return Some(Displayable::Bitmap(entry));
        }
        self.pool.get_sync(index).map(Displayable::Source)
    }

    /// Queue a decode of `index` at `tier` under the current generation
    pub fn request(&self, index: usize, tier: Tier) -> CacheResult<()> {
        self.queue.request(index, tier)
    }

    /// Fetch and decode `index` now, outside the queue
    ///
    /// Shares an in-flight decode of the same item. The result is discarded
    /// if the focus or the collection changes before it is ready.
    pub async fn load(&self, index: usize) -> CacheResult<CacheEntry> {
        let token = self.queue.current_token();
        if let Some(entry) = self.cache.get(index) {
            return Ok(entry);
        }
        let pooled = self.pool.get(index).await?;
        self.cache.decode_for(index, pooled.source(), token).await
    }

    /// The user moved to `index`
    ///
    /// Returns the generation of the new focus.
    pub fn notify_focus(&self, index: usize) -> u64 {
        self.queue.set_focus(index).value()
    }

    /// A grid now shows `[start, end]`
    ///
    /// Returns the epoch of the new range.
    pub fn notify_visible_range(&self, start: usize, end: usize) -> u64 {
        self.thumbnails.notify_range(start, end)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn progressive_state(&self) -> ProgressiveState {
        self.queue.progressive_state()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// The thumbnail batch issued for the last settled range
    pub fn last_thumbnail_batch(&self) -> Option<ThumbnailBatch> {
        self.thumbnails.last_batch()
    }

    /// Snapshot of the current configuration
    pub fn config(&self) -> EngineConfig {
        self.config.snapshot()
    }

    /// Edit the configuration at runtime
    ///
    /// Capacities, the pool byte budget, the pool batch size and the
    /// readiness timeout apply
    /// immediately. Radii, delays and progressive settings are picked up
    /// on the next focus change, the debounce and margin on the next range.
    ///
    /// # Errors
    ///
    /// Returns an error, leaving the configuration unchanged, if the edited
    /// configuration does not validate.
    pub fn update_config(
        &self,
        edit: impl FnOnce(&mut EngineConfig),
    ) -> Result<EngineConfig, ConfigError> {
        let updated = self.config.update(edit)?;

        self.cache.set_capacity(updated.cache_capacity);
        self.cache.set_readiness_timeout(updated.readiness_timeout());
        self.pool.set_capacity(updated.pool_capacity);
        self.pool.set_max_bytes(updated.pool_max_bytes);
        self.pool.set_batch_size(updated.pool_batch_size);

        let revision = self.config.revision();
        tracing::debug!(revision, "configuration updated");
        self.events.emit(EngineEvent::ConfigUpdated { revision });
        Ok(updated)
    }

    /// Apply a ready event from the upscaling backend
    pub fn handle_upscale_event(&self, event: &UpscaleReadyEvent) -> EventOutcome {
        self.overlay.apply_event(event)
    }

    /// Turn the upscale overlay on or off; off drops every upscaled image
    pub fn set_upscale_enabled(&self, enabled: bool) {
        self.overlay.set_enabled(enabled);
    }

    /// Publish that the decode backend can take work
    pub fn mark_backend_ready(&self) {
        if self.readiness.is_ready() {
            return;
        }
        self.readiness.mark_ready();
        tracing::info!("decode backend ready");
        self.events.emit(EngineEvent::BackendReady);
    }

    /// Subscribe to every engine event
    pub fn subscribe(&self) -> EngineEvents {
        EngineEvents {
            lifecycle: self.events.subscribe(),
            cache: self.cache.subscribe(),
            queue: self.queue.subscribe(),
            thumbnails: self.thumbnails.subscribe(),
            overlay: self.overlay.subscribe(),
        }
    }

    pub fn cache(&self) -> &BitmapCache {
        &self.cache
    }

    pub fn pool(&self) -> &BlobPool {
        &self.pool
    }

    pub fn overlay(&self) -> &UpscaleOverlay {
        &self.overlay
    }

    pub fn queue(&self) -> &RenderQueue {
        &self.queue
    }
}

impl Drop for PrefetchEngine {
    fn drop(&mut self) {
        self.queue.cancel_all();
        self.thumbnails.reset();
    }
}
