//! Decoded bitmap cache with LRU eviction and single-flight decoding
//!
//! Keeps a small number of decoded bitmaps warm around the reading position.
//! Bitmaps are expensive, so the capacity is counted in entries rather than
//! bytes and defaults to 10.
//!
//! # Lifecycle
//!
//! - An entry is created by the first successful decode of an index.
//! - Touching an entry (`get`, or `decode` of a cached index) makes it the
//!   most recently used one.
//! - Inserting into a full cache evicts the least recently used entry.
//! - Evicted, removed and cleared entries have their bitmap closed before the
//!   map entry goes away.
//!
//! # Staleness
//!
//! [`BitmapCache::decode_for`] carries the caller's [`GenerationToken`]. A
//! decode that finishes after its token went stale, or after the cache was
//! cleared, closes its bitmap and reports [`CacheError::Stale`] instead of
//! inserting.

use crate::bitmap::Bitmap;
use crate::error::{CacheError, CacheResult};
use crate::generation::GenerationToken;
use crate::notify::Notifier;
use crate::readiness::BackendReadiness;
use crate::source::{ByteSource, DecodeBackend};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// A decoded bitmap held by the cache
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Item index within the active collection
    pub index: usize,

    /// Decoded pixels; closed by the cache on eviction
    pub bitmap: Bitmap,

    /// Width of the bitmap in pixels
    pub width: u32,

    /// Height of the bitmap in pixels
    pub height: u32,

    /// When the entry was last touched
    pub last_access: Instant,
}

/// Mutation published to cache subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheChange {
    /// A freshly decoded bitmap entered the cache
    Inserted { index: usize },
    /// The least recently used entry was pushed out
    Evicted { index: usize },
    /// An entry was removed explicitly
    Removed { index: usize },
    /// Every entry was dropped
    Cleared { count: usize },
    /// A decode finished for a superseded generation and was thrown away
    Discarded { index: usize },
}

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of bitmaps currently cached
    pub entries: usize,

    /// Maximum number of bitmaps
    pub capacity: usize,

    /// Lookups that found a bitmap
    pub hits: u64,

    /// Lookups that found nothing
    pub misses: u64,

    /// Entries pushed out by capacity pressure
    pub evictions: u64,

    /// Decode backend invocations
    pub decodes: u64,

    /// Decodes that failed
    pub failures: u64,

    /// Results thrown away because their generation went stale
    pub discarded: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type DecodeFlight = Shared<BoxFuture<'static, CacheResult<CacheEntry>>>;

/// Internal cache state
struct CacheState {
    /// Map from item index to cached entry
    entries: HashMap<usize, CacheEntry>,

    /// LRU queue (most recently used at back, least recently used at front)
    lru_queue: VecDeque<usize>,

    /// Decodes currently running, tagged with a flight id
    in_flight: HashMap<usize, (u64, DecodeFlight)>,

    capacity: usize,

    /// Advanced by `clear`; results from an older epoch are discarded
    epoch: u64,

    next_flight: u64,

    stats: CacheStats,
}

impl CacheState {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            capacity,
            epoch: 0,
            next_flight: 0,
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    /// Move an index to the back of the LRU queue (mark as most recently used)
    fn touch(&mut self, index: usize) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(&index)?;
        entry.last_access = Instant::now();
        let entry = entry.clone();
        self.lru_queue.retain(|&i| i != index);
        self.lru_queue.push_back(index);
        Some(entry)
    }

    /// Evict the least recently used entry, closing its bitmap
    fn evict_lru(&mut self) -> Option<usize> {
        while let Some(index) = self.lru_queue.pop_front() {
            if let Some(entry) = self.entries.remove(&index) {
                entry.bitmap.close();
                self.stats.evictions += 1;
                return Some(index);
            }
        }
        None
    }

    /// Evict entries until `incoming` more fit under the capacity
    fn evict_to_fit(&mut self, incoming: usize, changes: &mut Vec<CacheChange>) {
        while self.entries.len() + incoming > self.capacity && !self.entries.is_empty() {
            match self.evict_lru() {
                Some(index) => changes.push(CacheChange::Evicted { index }),
                None => break,
            }
        }
    }

    fn insert(&mut self, index: usize, bitmap: Bitmap, changes: &mut Vec<CacheChange>) -> CacheEntry {
        if let Some(old) = self.entries.remove(&index) {
            old.bitmap.close();
            self.lru_queue.retain(|&i| i != index);
        }

        self.evict_to_fit(1, changes);

        let entry = CacheEntry {
            index,
            width: bitmap.width(),
            height: bitmap.height(),
            bitmap,
            last_access: Instant::now(),
        };
        self.entries.insert(index, entry.clone());
        self.lru_queue.push_back(index);
        self.stats.entries = self.entries.len();
        changes.push(CacheChange::Inserted { index });
        entry
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    backend: Arc<dyn DecodeBackend>,
    readiness: BackendReadiness,
    readiness_timeout: Mutex<Duration>,
    changes: Notifier<CacheChange>,
}

impl CacheInner {
    fn publish(&self, changes: Vec<CacheChange>) {
        for change in changes {
            self.changes.emit(change);
        }
    }
}

/// Decoded bitmap cache with LRU eviction
///
/// Thread-safe and cheap to clone; clones share the same cache. The state
/// lock is never held across an await.
///
/// # Example
///
/// ```no_run
/// use pageflow_cache::{BitmapCache, ByteSource, ImageDecoder};
/// use std::sync::Arc;
///
/// # async fn demo() -> pageflow_cache::CacheResult<()> {
/// let cache = BitmapCache::new(Arc::new(ImageDecoder), 10);
///
/// let entry = cache.decode(0, ByteSource::File("001.png".into())).await?;
/// println!("decoded {}x{}", entry.width, entry.height);
///
/// // The second request is served from the cache
/// assert!(cache.get(0).is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BitmapCache {
    inner: Arc<CacheInner>,
}

impl BitmapCache {
    /// Create a cache in front of `backend` holding up to `capacity` bitmaps
    ///
    /// # Arguments
    ///
    /// * `backend` - Decoder invoked on cache misses
    /// * `capacity` - Maximum number of bitmaps kept (at least 1)
    pub fn new(backend: Arc<dyn DecodeBackend>, capacity: usize) -> Self {
        Self::with_readiness(backend, capacity, BackendReadiness::ready())
    }

    /// Create a cache whose decodes first wait for `readiness`
    pub fn with_readiness(
        backend: Arc<dyn DecodeBackend>,
        capacity: usize,
        readiness: BackendReadiness,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::new(capacity.max(1))),
                backend,
                readiness,
                readiness_timeout: Mutex::new(Duration::from_millis(2000)),
                changes: Notifier::new(),
            }),
        }
    }

    /// Set how long a decode waits for the backend to become ready
    pub fn set_readiness_timeout(&self, timeout: Duration) {
        *self.inner.readiness_timeout.lock() = timeout;
    }

    /// Retrieve a cached bitmap, marking it most recently used
    ///
    /// Updates hit/miss statistics.
    pub fn get(&self, index: usize) -> Option<CacheEntry> {
        let mut state = self.inner.state.lock();
        match state.touch(index) {
            Some(entry) => {
                state.stats.hits += 1;
                Some(entry)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Retrieve a cached bitmap without touching LRU order or statistics
    pub fn peek(&self, index: usize) -> Option<CacheEntry> {
        self.inner.state.lock().entries.get(&index).cloned()
    }

    /// Check if an index is cached without updating LRU tracking
    pub fn has(&self, index: usize) -> bool {
        self.inner.state.lock().entries.contains_key(&index)
    }

    /// Whether a decode for `index` is currently running
    pub fn is_decoding(&self, index: usize) -> bool {
        self.inner.state.lock().in_flight.contains_key(&index)
    }

    /// Decode `index` from `source`, or return the cached bitmap
    ///
    /// Concurrent calls for the same index share one decode. Failures are
    /// not cached; the next call retries from scratch.
    pub async fn decode(&self, index: usize, source: ByteSource) -> CacheResult<CacheEntry> {
        self.decode_for(index, source, GenerationToken::detached())
            .await
    }

    /// Decode `index` on behalf of the generation captured in `token`
    ///
    /// Returns [`CacheError::Stale`] without side effects if the token is
    /// stale before the decode starts. A decode that completes after the
    /// token went stale closes its bitmap and is not inserted.
    pub async fn decode_for(
        &self,
        index: usize,
        source: ByteSource,
        token: GenerationToken,
    ) -> CacheResult<CacheEntry> {
        let mut retried = false;
        loop {
            if token.is_stale() {
                return Err(CacheError::Stale);
            }

            let (flight, epoch) = match self.join_or_start(index, &source, &token) {
                Ok(entry) => return Ok(entry),
                Err(joined) => joined,
            };

            match flight.await {
                // Joined a flight from a superseded generation; ours is still live
                Err(CacheError::Stale)
                    if !retried && token.is_current() && self.epoch() == epoch =>
                {
                    retried = true;
                    continue;
                }
                result => return result,
            }
        }
    }

    fn epoch(&self) -> u64 {
        self.inner.state.lock().epoch
    }

    /// Returns the cached entry, or the flight to await and the epoch it
    /// belongs to
    fn join_or_start(
        &self,
        index: usize,
        source: &ByteSource,
        token: &GenerationToken,
    ) -> Result<CacheEntry, (DecodeFlight, u64)> {
        let mut state = self.inner.state.lock();

        if let Some(entry) = state.touch(index) {
            state.stats.hits += 1;
            return Ok(entry);
        }

        if let Some((_, flight)) = state.in_flight.get(&index) {
            tracing::trace!(index, "joining in-flight decode");
            return Err((flight.clone(), state.epoch));
        }

        state.stats.decodes += 1;
        let flight_id = state.next_flight;
        state.next_flight += 1;
        let epoch = state.epoch;

        let task = tokio::spawn(run_decode(
            self.inner.clone(),
            index,
            source.clone(),
            token.clone(),
            flight_id,
            epoch,
        ));
        let flight = async move {
            task.await.unwrap_or_else(|e| {
                Err(CacheError::Decode {
                    index,
                    reason: format!("decode task aborted: {e}"),
                })
            })
        }
        .boxed()
        .shared();

        state.in_flight.insert(index, (flight_id, flight.clone()));
        Err((flight, epoch))
    }

    /// Remove a bitmap from the cache, closing it
    ///
    /// # Returns
    ///
    /// `true` if the index was cached
    pub fn remove(&self, index: usize) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            match state.entries.remove(&index) {
                Some(entry) => {
                    entry.bitmap.close();
                    state.lru_queue.retain(|&i| i != index);
                    state.stats.entries = state.entries.len();
                    true
                }
                None => false,
            }
        };

        if removed {
            self.inner.changes.emit(CacheChange::Removed { index });
        }
        removed
    }

    /// Clear all bitmaps, closing each one
    ///
    /// Decodes still running are detached; their results are discarded.
    pub fn clear(&self) {
        let count = {
            let mut state = self.inner.state.lock();
            let count = state.entries.len();
            for (_, entry) in state.entries.drain() {
                entry.bitmap.close();
            }
            state.lru_queue.clear();
            state.in_flight.clear();
            state.epoch += 1;
            state.stats.entries = 0;
            count
        };

        tracing::debug!(count, "bitmap cache cleared");
        self.inner.changes.emit(CacheChange::Cleared { count });
    }

    /// Update the capacity
    ///
    /// If the new capacity is smaller than the current entry count, least
    /// recently used entries are evicted until it fits.
    pub fn set_capacity(&self, capacity: usize) {
        let mut changes = Vec::new();
        {
            let mut state = self.inner.state.lock();
            state.capacity = capacity.max(1);
            state.stats.capacity = state.capacity;
            state.evict_to_fit(0, &mut changes);
            state.stats.entries = state.entries.len();
        }
        self.inner.publish(changes);
    }

    pub fn capacity(&self) -> usize {
        self.inner.state.lock().capacity
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached indices from least to most recently used
    pub fn cached_indices(&self) -> Vec<usize> {
        self.inner.state.lock().lru_queue.iter().copied().collect()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.inner.state.lock().stats
    }

    /// Subscribe to cache mutations
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }
}

async fn run_decode(
    inner: Arc<CacheInner>,
    index: usize,
    source: ByteSource,
    token: GenerationToken,
    flight_id: u64,
    epoch: u64,
) -> CacheResult<CacheEntry> {
    let timeout = *inner.readiness_timeout.lock();
    let decoded = async {
        inner.readiness.wait(timeout).await?;
        if token.is_stale() {
            return Err(CacheError::Stale);
        }
        let bytes = source.read(index).await?;
        if token.is_stale() {
            return Err(CacheError::Stale);
        }
        inner
            .backend
            .decode(bytes)
            .await
            .map_err(|e| e.for_index(index))
    }
    .await;

    let mut changes = Vec::new();
    let result = {
        let mut state = inner.state.lock();
        if matches!(state.in_flight.get(&index), Some((id, _)) if *id == flight_id) {
            state.in_flight.remove(&index);
        }

        match decoded {
            Ok(bitmap) if token.is_stale() || state.epoch != epoch => {
                bitmap.close();
                state.stats.discarded += 1;
                changes.push(CacheChange::Discarded { index });
                Err(CacheError::Stale)
            }
            Ok(bitmap) => Ok(state.insert(index, bitmap, &mut changes)),
            Err(CacheError::Stale) => Err(CacheError::Stale),
            Err(err) => {
                state.stats.failures += 1;
                Err(err)
            }
        }
    };
    inner.publish(changes);

    match &result {
        Err(CacheError::Stale) => {
            tracing::debug!(index, generation = token.value(), "discarded stale decode")
        }
        Err(err) => tracing::warn!(index, error = %err, "decode failed"),
        Ok(entry) => tracing::trace!(index, width = entry.width, height = entry.height, "decoded"),
    }
    result
}
