//! Visibility-driven thumbnail requests
//!
//! A grid or list shows a window of a much larger collection. Only what is
//! visible (plus an optional margin) is worth decoding. Range changes are
//! debounced so that a scroll fling only requests the range it settles on,
//! and every range change supersedes the loads still running for the
//! previous one.

use pageflow_cache::{
    BitmapCache, BlobPool, CacheError, GenerationCounter, GenerationToken, Notifier, SharedConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Request priority of a thumbnail
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    /// Inside the visible range
    Immediate,
    /// A neighbor just outside the visible range
    Normal,
}

/// One item of a coalesced batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThumbnailRequest {
    pub index: usize,
    pub priority: RequestPriority,
}

/// The requests issued for one settled range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailBatch {
    /// Epoch the batch belongs to
    pub epoch: u64,

    /// First visible index
    pub start: usize,

    /// Last visible index (inclusive)
    pub end: usize,

    /// Requests, in issue order
    pub requests: Vec<ThumbnailRequest>,
}

impl ThumbnailBatch {
    pub fn indices(&self) -> Vec<usize> {
        self.requests.iter().map(|r| r.index).collect()
    }
}

/// Events published by the requestor
#[derive(Debug, Clone, PartialEq)]
pub enum RequestorEvent {
    /// A settled range produced a batch
    BatchIssued(ThumbnailBatch),
    /// A thumbnail is now cached
    Loaded { index: usize, epoch: u64 },
    /// A thumbnail failed; it is retried when it becomes visible again
    Failed { index: usize, error: CacheError },
    /// A range change superseded everything before `epoch`
    Superseded { epoch: u64 },
}

/// Order visible candidates for issue
///
/// Immediate before normal, then by distance from the range center, then by
/// index. Distances are compared doubled so the midpoint of an even-width
/// range needs no rounding.
pub fn order_by_center(requests: &mut [ThumbnailRequest], start: usize, end: usize) {
    let doubled_center = start + end;
    requests.sort_by_key(|r| (r.priority, (2 * r.index).abs_diff(doubled_center), r.index));
}

struct RequestorState {
    task: Option<JoinHandle<()>>,
    range: Option<(usize, usize)>,
    last_batch: Option<ThumbnailBatch>,
}

struct RequestorInner {
    cache: BitmapCache,
    pool: BlobPool,
    config: SharedConfig,
    epoch: GenerationCounter,
    state: Mutex<RequestorState>,
    events: Notifier<RequestorEvent>,
    runtime: Handle,
}

impl RequestorInner {
    /// Build the batch for a settled range
    fn plan(&self, start: usize, end: usize, margin: usize, epoch: u64) -> Option<ThumbnailBatch> {
        let collection = self.pool.collection()?;
        if collection.is_empty() || start >= collection.len() {
            return None;
        }
        let last = end.min(collection.len() - 1);

        let wanted = |index: usize| {
            collection
                .kind(index)
                .is_some_and(|kind| kind.is_thumbnail_candidate())
                && !self.cache.has(index)
        };

        let mut requests: Vec<ThumbnailRequest> = (start..=last)
            .filter(|&i| wanted(i))
            .map(|index| ThumbnailRequest {
                index,
                priority: RequestPriority::Immediate,
            })
            .collect();

        let before = start.saturating_sub(margin)..start;
        let after = (last + 1)..last.saturating_add(1).saturating_add(margin).min(collection.len());
        requests.extend(
            before
                .chain(after)
                .filter(|&i| wanted(i))
                .map(|index| ThumbnailRequest {
                    index,
                    priority: RequestPriority::Normal,
                }),
        );

        order_by_center(&mut requests, start, last);
        Some(ThumbnailBatch {
            epoch,
            start,
            end: last,
            requests,
        })
    }

    async fn load(&self, batch: &ThumbnailBatch, token: &GenerationToken, chunk_size: usize) {
        for chunk in batch.requests.chunks(chunk_size.max(1)) {
            if token.is_stale() {
                return;
            }
            let loads = chunk.iter().map(|request| {
                let index = request.index;
                async move {
                    let pooled = self.pool.get(index).await?;
                    if token.is_stale() {
                        return Err(CacheError::Stale);
                    }
                    self.cache
                        .decode_for(index, pooled.source(), token.clone())
                        .await
                        .map(|_| index)
                }
            });

            for (request, result) in chunk.iter().zip(futures::future::join_all(loads).await) {
                match result {
                    Ok(index) => self.events.emit(RequestorEvent::Loaded {
                        index,
                        epoch: token.value(),
                    }),
                    Err(err) if err.is_stale() => {
                        tracing::debug!(index = request.index, epoch = token.value(), "thumbnail superseded");
                    }
                    Err(error) => {
                        tracing::warn!(index = request.index, error = %error, "thumbnail failed");
                        self.events.emit(RequestorEvent::Failed {
                            index: request.index,
                            error,
                        });
                    }
                }
            }
        }
    }
}

async fn settle_and_load(inner: Arc<RequestorInner>, start: usize, end: usize, token: GenerationToken) {
    let config = inner.config.snapshot();
    tokio::time::sleep(config.visibility_debounce()).await;
    if token.is_stale() {
        return;
    }

    let Some(batch) = inner.plan(start, end, config.thumbnail_margin, token.value()) else {
        // Nothing of the range is in the collection
        let mut state = inner.state.lock();
        if token.is_current() {
            state.last_batch = None;
        }
        return;
    };
    {
        let mut state = inner.state.lock();
        if token.is_stale() {
            return;
        }
        state.last_batch = Some(batch.clone());
    }
    tracing::debug!(start, end, requests = batch.requests.len(), "thumbnail batch issued");
    inner.events.emit(RequestorEvent::BatchIssued(batch.clone()));

    inner.load(&batch, &token, config.pool_batch_size).await;
}

/// Requests thumbnails for whatever the grid currently shows
///
/// Cheap to clone; clones share the same requestor.
#[derive(Clone)]
pub struct ThumbnailRequestor {
    inner: Arc<RequestorInner>,
}

impl ThumbnailRequestor {
    /// Create a requestor whose debounce and loads run on `runtime`
    pub fn new(cache: BitmapCache, pool: BlobPool, config: SharedConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(RequestorInner {
                cache,
                pool,
                config,
                epoch: GenerationCounter::new(),
                state: Mutex::new(RequestorState {
                    task: None,
                    range: None,
                    last_batch: None,
                }),
                events: Notifier::new(),
                runtime,
            }),
        }
    }

    /// Report the visible range `[start, end]`
    ///
    /// Supersedes the previous range immediately; the new range is requested
    /// once it has been stable for the debounce window. Returns the epoch of
    /// the new range.
    pub fn notify_range(&self, start: usize, end: usize) -> u64 {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };

        let token = {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.task.take() {
                task.abort();
            }
            let token = self.inner.epoch.advance();
            state.range = Some((start, end));
            let task = self
                .inner
                .runtime
                .spawn(settle_and_load(self.inner.clone(), start, end, token.clone()));
            state.task = Some(task);
            token
        };

        self.inner.events.emit(RequestorEvent::Superseded {
            epoch: token.value(),
        });
        token.value()
    }

    /// Drop the current range and everything requested for it
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        self.inner.epoch.advance();
        state.range = None;
        state.last_batch = None;
    }

    /// The most recently reported range
    pub fn range(&self) -> Option<(usize, usize)> {
        self.inner.state.lock().range
    }

    /// The batch issued for the most recent settled range
    pub fn last_batch(&self) -> Option<ThumbnailBatch> {
        self.inner.state.lock().last_batch.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.epoch.current()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestorEvent> {
        self.inner.events.subscribe()
    }
}
