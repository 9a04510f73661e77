//! URL/blob pool of resolved byte sources
//!
//! The pool sits below the bitmap cache: it holds the encoded bytes of items
//! of the active collection so that decoding never waits on archive
//! extraction or disk reads. It is far cheaper per entry than the bitmap
//! cache, so it is bounded separately: by entry count (64 by default) and by
//! total pooled bytes (256 MiB by default), whichever is hit first.
//!
//! Switching collections drops every entry and detaches every fetch still
//! running; a fetch begun for the old collection never lands in the new one.

use crate::collection::{outward_indices, Collection, CollectionId};
use crate::error::{CacheError, CacheResult};
use crate::source::{ByteSource, ByteSourceResolver};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Encoded bytes of one item of the active collection
#[derive(Debug, Clone)]
pub struct PooledImage {
    /// Collection the bytes belong to
    pub collection: CollectionId,

    /// Item index within the collection
    pub index: usize,

    /// Encoded image bytes
    pub bytes: Arc<[u8]>,
}

impl PooledImage {
    /// The pooled bytes as a decodable source
    pub fn source(&self) -> ByteSource {
        ByteSource::Blob(self.bytes.clone())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Statistics about pool usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of pooled items
    pub entries: usize,

    /// Total pooled bytes
    pub bytes: usize,

    /// Requests served from the pool
    pub hits: u64,

    /// Resolver invocations
    pub fetches: u64,

    /// Fetches that failed
    pub failures: u64,

    /// Entries dropped for the entry or byte limit
    pub evictions: u64,
}

type FetchFlight = Shared<BoxFuture<'static, CacheResult<Arc<PooledImage>>>>;

struct PoolState {
    collection: Option<Collection>,
    entries: HashMap<usize, Arc<PooledImage>>,
    lru_queue: VecDeque<usize>,
    in_flight: HashMap<usize, (u64, FetchFlight)>,
    capacity: usize,
    max_bytes: usize,
    batch_size: usize,
    /// Advanced on every collection switch
    epoch: u64,
    next_flight: u64,
    stats: PoolStats,
}

impl PoolState {
    fn touch(&mut self, index: usize) -> Option<Arc<PooledImage>> {
        let image = self.entries.get(&index)?.clone();
        self.lru_queue.retain(|&i| i != index);
        self.lru_queue.push_back(index);
        Some(image)
    }

    fn evict_lru(&mut self) -> bool {
        let Some(victim) = self.lru_queue.pop_front() else {
            return false;
        };
        if let Some(old) = self.entries.remove(&victim) {
            self.stats.bytes = self.stats.bytes.saturating_sub(old.len());
            self.stats.evictions += 1;
        }
        true
    }

    /// Evict from the LRU end until `incoming` more entries and `needed` more
    /// bytes fit; an item larger than the whole budget is still kept alone
    fn evict_until_fit(&mut self, incoming: usize, needed: usize) {
        while !self.entries.is_empty()
            && (self.entries.len() + incoming > self.capacity
                || self.stats.bytes + needed > self.max_bytes)
        {
            if !self.evict_lru() {
                break;
            }
        }
        self.stats.entries = self.entries.len();
    }

    fn insert(&mut self, image: Arc<PooledImage>) {
        let index = image.index;
        if let Some(old) = self.entries.remove(&index) {
            self.stats.bytes = self.stats.bytes.saturating_sub(old.len());
            self.lru_queue.retain(|&i| i != index);
        }

        self.evict_until_fit(1, image.len());

        self.stats.bytes += image.len();
        self.entries.insert(index, image);
        self.lru_queue.push_back(index);
        self.stats.entries = self.entries.len();
    }

    fn reset(&mut self, collection: Option<Collection>) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.lru_queue.clear();
        self.in_flight.clear();
        self.epoch += 1;
        self.collection = collection;
        self.stats.entries = 0;
        self.stats.bytes = 0;
        dropped
    }
}

struct PoolInner {
    state: Mutex<PoolState>,
    resolver: Arc<dyn ByteSourceResolver>,
}

/// Bounded pool of encoded item bytes with single-flight fetching
///
/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct BlobPool {
    inner: Arc<PoolInner>,
}

impl BlobPool {
    /// Create an empty pool with no collection
    ///
    /// # Arguments
    ///
    /// * `resolver` - Turns `(collection, index)` into a byte source
    /// * `capacity` - Maximum pooled items (at least 1)
    /// * `batch_size` - Concurrent fetches per preload batch (at least 1)
    ///
    /// The byte budget starts unbounded; see [`set_max_bytes`](Self::set_max_bytes).
    pub fn new(resolver: Arc<dyn ByteSourceResolver>, capacity: usize, batch_size: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState {
                    collection: None,
                    entries: HashMap::new(),
                    lru_queue: VecDeque::new(),
                    in_flight: HashMap::new(),
                    capacity: capacity.max(1),
                    max_bytes: usize::MAX,
                    batch_size: batch_size.max(1),
                    epoch: 0,
                    next_flight: 0,
                    stats: PoolStats::default(),
                }),
                resolver,
            }),
        }
    }

    /// Drop everything pooled and start serving `collection`
    pub fn switch_collection(&self, collection: Collection) {
        let id = collection.id().clone();
        let dropped = self.inner.state.lock().reset(Some(collection));
        tracing::debug!(collection = %id, dropped, "blob pool switched collection");
    }

    /// Drop everything pooled and stop serving any collection
    pub fn close_collection(&self) {
        let dropped = self.inner.state.lock().reset(None);
        tracing::debug!(dropped, "blob pool closed");
    }

    /// The collection currently served
    pub fn collection(&self) -> Option<Collection> {
        self.inner.state.lock().collection.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_capacity(&self, capacity: usize) {
        let mut state = self.inner.state.lock();
        state.capacity = capacity.max(1);
        state.evict_until_fit(0, 0);
    }

    /// Bound the total pooled bytes, evicting least recently used entries
    /// until the pool fits
    pub fn set_max_bytes(&self, max_bytes: usize) {
        let mut state = self.inner.state.lock();
        state.max_bytes = max_bytes.max(1);
        state.evict_until_fit(0, 0);
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.inner.state.lock().batch_size = batch_size.max(1);
    }

    /// Cache-only read that never starts a fetch
    ///
    /// Returns `None` while a fetch for `index` is still running.
    pub fn get_sync(&self, index: usize) -> Option<Arc<PooledImage>> {
        let mut state = self.inner.state.lock();
        let image = state.touch(index)?;
        state.stats.hits += 1;
        Some(image)
    }

    /// Whether `index` is pooled
    pub fn contains(&self, index: usize) -> bool {
        self.inner.state.lock().entries.contains_key(&index)
    }

    /// Resolve and pool the bytes of `index`
    ///
    /// Concurrent calls for the same index share one fetch.
    pub async fn get(&self, index: usize) -> CacheResult<Arc<PooledImage>> {
        let flight = {
            let mut state = self.inner.state.lock();
            let collection = state.collection.clone().ok_or(CacheError::NoCollection)?;
            if !collection.contains(index) {
                return Err(CacheError::OutOfRange {
                    index,
                    len: collection.len(),
                });
            }

            if let Some(image) = state.touch(index) {
                state.stats.hits += 1;
                return Ok(image);
            }

            match state.in_flight.get(&index) {
                Some((_, flight)) => flight.clone(),
                None => {
                    state.stats.fetches += 1;
                    let flight_id = state.next_flight;
                    state.next_flight += 1;

                    let task = tokio::spawn(run_fetch(
                        self.inner.clone(),
                        collection.id().clone(),
                        index,
                        flight_id,
                        state.epoch,
                    ));
                    let flight = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(CacheError::SourceUnavailable {
                                index,
                                reason: format!("fetch task aborted: {e}"),
                            })
                        })
                    }
                    .boxed()
                    .shared();

                    state.in_flight.insert(index, (flight_id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Populate the pool in the background
    ///
    /// Fetches run in batches of the configured batch size; the task stops
    /// early if the collection changes. The handle resolves to the number of
    /// items now pooled by this call.
    pub fn preload(&self, indices: Vec<usize>) -> JoinHandle<usize> {
        let pool = self.clone();
        let (epoch, batch_size) = {
            let state = self.inner.state.lock();
            (state.epoch, state.batch_size)
        };

        tokio::spawn(async move {
            let mut loaded = 0;
            for batch in indices.chunks(batch_size) {
                if pool.inner.state.lock().epoch != epoch {
                    break;
                }
                let results = futures::future::join_all(batch.iter().map(|&i| pool.get(i))).await;
                loaded += results.iter().filter(|r| r.is_ok()).count();
            }
            loaded
        })
    }

    /// Preload `center`, then `center+1`, `center-1`, ... out to `radius`
    pub fn preload_range(&self, center: usize, radius: usize) -> JoinHandle<usize> {
        let len = self
            .inner
            .state
            .lock()
            .collection
            .as_ref()
            .map_or(0, Collection::len);
        self.preload(outward_indices(center, 0, radius, len))
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.state.lock().stats
    }
}

async fn run_fetch(
    inner: Arc<PoolInner>,
    collection: CollectionId,
    index: usize,
    flight_id: u64,
    epoch: u64,
) -> CacheResult<Arc<PooledImage>> {
    let fetched = async {
        let source = inner.resolver.resolve(&collection, index).await?;
        source.read(index).await
    }
    .await;

    let mut state = inner.state.lock();
    if matches!(state.in_flight.get(&index), Some((id, _)) if *id == flight_id) {
        state.in_flight.remove(&index);
    }

    if state.epoch != epoch {
        tracing::debug!(collection = %collection, index, "discarded fetch for previous collection");
        return Err(CacheError::Stale);
    }

    match fetched {
        Ok(bytes) => {
            let image = Arc::new(PooledImage {
                collection,
                index,
                bytes,
            });
            state.insert(image.clone());
            Ok(image)
        }
        Err(err) => {
            state.stats.failures += 1;
            drop(state);
            tracing::warn!(index, error = %err, "byte source fetch failed");
            Err(err)
        }
    }
}
