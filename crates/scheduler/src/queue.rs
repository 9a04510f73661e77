//! Render priority queue
//!
//! Owns the current generation and the focus-driven schedule. A focus change
//! cancels everything outstanding, advances the generation and schedules the
//! warm window around the new focus in staggered tiers:
//!
//! - the focus itself immediately (if not cached)
//! - HIGH, NORMAL and LOW tiers after their configured delays
//!
//! A single worker loop pops tasks in tier order, skips stale or cached ones
//! and decodes the rest through the blob pool and the bitmap cache. The loop
//! never runs twice at once, which bounds the load on the decode backend.

use crate::priority::{PushOutcome, QueueTask, TaskQueue, TaskStatus, Tier};
use crate::progressive::{ProgressiveLoader, ProgressiveState};
use crate::tiers::{TierPlan, TierRadii, TierStage};
use pageflow_cache::{
    BitmapCache, BlobPool, CacheError, CacheResult, Collection, GenerationCounter,
    GenerationToken, Notifier, SharedConfig,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Scheduling and completion events
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    /// Focus moved; everything older than `generation` is stale
    FocusChanged { index: usize, generation: u64 },
    /// A task entered the queue
    Scheduled {
        index: usize,
        tier: Tier,
        generation: u64,
        at: Instant,
    },
    /// A task finished and its bitmap is cached
    Loaded { index: usize, generation: u64 },
    /// A task failed; the item is eligible for retry on the next request
    Failed { index: usize, error: CacheError },
    /// A task finished after its generation went stale
    Discarded { index: usize, generation: u64 },
    /// Outstanding tasks were cancelled
    Cancelled { count: usize },
    /// The progressive loader changed state
    Progressive(ProgressiveState),
}

/// Diagnostics snapshot of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub current_focus: Option<usize>,
    pub pending_count: usize,
    pub cached_count: usize,
    pub generation: u64,
}

/// Render queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Focus changes handled
    pub focus_changes: u64,

    /// Tasks queued
    pub scheduled: u64,

    /// Tasks that produced a cached bitmap
    pub loaded: u64,

    /// Tasks that failed
    pub failed: u64,

    /// Tasks whose result was stale
    pub discarded: u64,

    /// Tasks cancelled before they ran
    pub cancelled: u64,
}

struct QueueState {
    focus: Option<usize>,
    tasks: TaskQueue,
    statuses: HashMap<usize, TaskStatus>,
    stagger: Option<JoinHandle<()>>,
    stats: QueueStats,
}

impl QueueState {
    /// Cancel every pending and loading task and stop the stagger timer
    fn cancel_outstanding(&mut self) -> usize {
        if let Some(stagger) = self.stagger.take() {
            stagger.abort();
        }

        let drained = self.tasks.drain();
        let mut count = drained.len();
        for task in drained {
            self.statuses.insert(task.index, TaskStatus::Cancelled);
        }
        for status in self.statuses.values_mut() {
            if *status == TaskStatus::Loading {
                *status = TaskStatus::Cancelled;
                count += 1;
            }
        }
        self.stats.cancelled += count as u64;
        count
    }
}

struct QueueInner {
    state: Mutex<QueueState>,
    cache: BitmapCache,
    pool: BlobPool,
    config: SharedConfig,
    generation: GenerationCounter,
    worker_active: AtomicBool,
    events: Notifier<QueueEvent>,
    progressive: ProgressiveLoader,
    runtime: Handle,
}

impl QueueInner {
    fn collection_len(&self) -> usize {
        self.pool.collection().as_ref().map_or(0, Collection::len)
    }

    /// Queue `indices` at `tier` if `token` is still current
    ///
    /// Cached indices are skipped. Returns the number of tasks queued.
    fn schedule(&self, indices: &[usize], tier: Tier, token: &GenerationToken) -> usize {
        let len = self.collection_len();
        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            // Checked under the lock: a focus change advances the generation while holding it
            if token.is_stale() {
                return 0;
            }
            for &index in indices {
                if index >= len || self.cache.has(index) {
                    continue;
                }
                if state.tasks.push(index, tier, token.value()) == PushOutcome::Duplicate {
                    continue;
                }
                state.statuses.insert(index, TaskStatus::Pending);
                state.stats.scheduled += 1;
                events.push(QueueEvent::Scheduled {
                    index,
                    tier,
                    generation: token.value(),
                    at: Instant::now(),
                });
            }
        }

        let queued = events.len();
        for event in events {
            self.events.emit(event);
        }
        queued
    }

    /// Start the worker loop unless it is already running
    fn kick(self: &Arc<Self>) {
        if self
            .worker_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.runtime.spawn(self.clone().run_worker());
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            while let Some(task) = self.next_task() {
                self.process(task).await;
            }

            self.worker_active.store(false, Ordering::Release);
            // A task queued between the last pop and the store above would
            // otherwise wait for the next kick
            if self.state.lock().tasks.is_empty() {
                break;
            }
            if self
                .worker_active
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
    }

    /// Pop the next task worth running and mark it loading
    fn next_task(&self) -> Option<QueueTask> {
        let mut state = self.state.lock();
        while let Some(task) = state.tasks.pop() {
            if task.generation != self.generation.current() {
                state.statuses.insert(task.index, TaskStatus::Cancelled);
                state.stats.cancelled += 1;
                continue;
            }
            if self.cache.has(task.index) {
                state.statuses.insert(task.index, TaskStatus::Done);
                continue;
            }
            state.statuses.insert(task.index, TaskStatus::Loading);
            return Some(task);
        }
        None
    }

    async fn process(&self, task: QueueTask) {
        let token = self.generation.token_at(task.generation);
        let index = task.index;

        let result = async {
            let pooled = self.pool.get(index).await?;
            if token.is_stale() {
                return Err(CacheError::Stale);
            }
            self.cache
                .decode_for(index, pooled.source(), token.clone())
                .await
        }
        .await;

        let event = {
            let mut state = self.state.lock();
            let current = token.is_current();
            match result {
                Ok(_) if current => {
                    state.statuses.insert(index, TaskStatus::Done);
                    state.stats.loaded += 1;
                    QueueEvent::Loaded {
                        index,
                        generation: task.generation,
                    }
                }
                Ok(_) | Err(CacheError::Stale) => {
                    state.stats.discarded += 1;
                    tracing::debug!(index, generation = task.generation, tier = ?task.tier, "stale render task discarded");
                    QueueEvent::Discarded {
                        index,
                        generation: task.generation,
                    }
                }
                Err(error) => {
                    if current {
                        state.statuses.insert(index, TaskStatus::Failed);
                    }
                    state.stats.failed += 1;
                    tracing::warn!(index, tier = ?task.tier, error = %error, "render task failed");
                    QueueEvent::Failed { index, error }
                }
            }
        };
        self.events.emit(event);
    }
}

async fn run_stagger(
    inner: Arc<QueueInner>,
    stages: Vec<TierStage>,
    token: GenerationToken,
    start: Instant,
) {
    for stage in stages {
        tokio::time::sleep_until(start + stage.delay).await;
        if token.is_stale() {
            return;
        }
        let queued = inner.schedule(&stage.indices, stage.tier, &token);
        tracing::trace!(tier = ?stage.tier, queued, generation = token.value(), "tier scheduled");
        if queued > 0 {
            inner.kick();
        }
    }
}

/// Focus-driven render scheduler
///
/// Cheap to clone; clones share the same queue.
///
/// # Example
///
/// ```no_run
/// use pageflow_cache::{BitmapCache, BlobPool, Collection, FileListResolver, ImageDecoder, SharedConfig};
/// use pageflow_scheduler::RenderQueue;
/// use std::sync::Arc;
/// use tokio::runtime::Handle;
///
/// # async fn demo() {
/// let resolver = Arc::new(FileListResolver::new(vec!["001.png".into(), "002.png".into()]));
/// let pool = BlobPool::new(resolver, 64, 4);
/// pool.switch_collection(Collection::pages("book", 2));
///
/// let cache = BitmapCache::new(Arc::new(ImageDecoder), 10);
/// let queue = RenderQueue::new(cache, pool, SharedConfig::default(), Handle::current());
///
/// // Page 0 is decoded immediately, page 1 after the HIGH delay
/// let token = queue.set_focus(0);
/// assert!(token.is_current());
/// # }
/// ```
#[derive(Clone)]
pub struct RenderQueue {
    inner: Arc<QueueInner>,
}

impl RenderQueue {
    /// Create a queue whose timers and worker run on `runtime`
    ///
    /// The queue can then be driven from any thread, including one outside
    /// the runtime.
    pub fn new(cache: BitmapCache, pool: BlobPool, config: SharedConfig, runtime: Handle) -> Self {
        let events = Notifier::new();
        let progressive = ProgressiveLoader::new(pool.clone(), events.clone(), runtime.clone());
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    focus: None,
                    tasks: TaskQueue::new(),
                    statuses: HashMap::new(),
                    stagger: None,
                    stats: QueueStats::default(),
                }),
                cache,
                pool,
                config,
                generation: GenerationCounter::new(),
                worker_active: AtomicBool::new(false),
                events,
                progressive,
                runtime,
            }),
        }
    }

    /// Move the focus to `focus`
    ///
    /// Cancels all outstanding work, advances the generation, queues the
    /// focus for immediate decoding and arms the staggered tiers. Radii and
    /// delays are read from the configuration on every call. Returns the
    /// token of the new generation.
    pub fn set_focus(&self, focus: usize) -> GenerationToken {
        // Timestamps follow the runtime's clock even when called from outside it
        let _runtime = self.inner.runtime.enter();
        let config = self.inner.config.snapshot();
        let len = self.inner.collection_len();

        let (token, cancelled) = {
            let mut state = self.inner.state.lock();
            let cancelled = state.cancel_outstanding();
            let token = self.inner.generation.advance();
            state.focus = Some(focus);
            state.stats.focus_changes += 1;
            (token, cancelled)
        };
        self.inner.progressive.cancel();

        if cancelled > 0 {
            self.inner.events.emit(QueueEvent::Cancelled { count: cancelled });
        }
        self.inner.events.emit(QueueEvent::FocusChanged {
            index: focus,
            generation: token.value(),
        });
        tracing::debug!(focus, generation = token.value(), cancelled, "focus changed");

        self.inner.schedule(&[focus], Tier::Critical, &token);

        let stages = TierPlan::around(focus, len, TierRadii::from_config(&config)).stages(&config);
        if !stages.is_empty() {
            let stagger = self.inner.runtime.spawn(run_stagger(
                self.inner.clone(),
                stages,
                token.clone(),
                Instant::now(),
            ));
            let mut state = self.inner.state.lock();
            if token.is_current() {
                state.stagger = Some(stagger);
            } else {
                stagger.abort();
            }
        }

        self.inner.progressive.restart(focus, len, token.clone(), &config);
        self.inner.kick();
        token
    }

    /// Cancel every outstanding task, the stagger timer and progressive
    /// loading
    ///
    /// The generation advances, so decodes already running are discarded
    /// when they finish. Returns the number of tasks cancelled.
    pub fn cancel_all(&self) -> usize {
        let cancelled = {
            let mut state = self.inner.state.lock();
            let cancelled = state.cancel_outstanding();
            self.inner.generation.advance();
            cancelled
        };
        self.inner.progressive.cancel();

        if cancelled > 0 {
            self.inner.events.emit(QueueEvent::Cancelled { count: cancelled });
        }
        cancelled
    }

    /// Forget the focus and all task history, e.g. on collection switch
    pub fn reset(&self) {
        self.cancel_all();
        let mut state = self.inner.state.lock();
        state.focus = None;
        state.statuses.clear();
    }

    /// Queue `index` at `tier` under the current generation
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NoCollection`] or [`CacheError::OutOfRange`]
    /// for indices outside the active collection.
    pub fn request(&self, index: usize, tier: Tier) -> CacheResult<()> {
        let collection = self.inner.pool.collection().ok_or(CacheError::NoCollection)?;
        if !collection.contains(index) {
            return Err(CacheError::OutOfRange {
                index,
                len: collection.len(),
            });
        }

        let _runtime = self.inner.runtime.enter();
        let token = self.inner.generation.token();
        if self.inner.schedule(&[index], tier, &token) > 0 {
            self.inner.kick();
        }
        Ok(())
    }

    /// Status of the most recent task for `index`
    pub fn task_status(&self, index: usize) -> Option<TaskStatus> {
        self.inner.state.lock().statuses.get(&index).copied()
    }

    /// Tier of the pending task for `index`
    pub fn pending_tier(&self, index: usize) -> Option<Tier> {
        self.inner.state.lock().tasks.tier_of(index)
    }

    pub fn current_focus(&self) -> Option<usize> {
        self.inner.state.lock().focus
    }

    /// Token of the current generation
    pub fn current_token(&self) -> GenerationToken {
        self.inner.generation.token()
    }

    pub fn status(&self) -> QueueStatus {
        let (current_focus, pending_count) = {
            let state = self.inner.state.lock();
            (state.focus, state.tasks.len())
        };
        QueueStatus {
            current_focus,
            pending_count,
            cached_count: self.inner.cache.len(),
            generation: self.inner.generation.current(),
        }
    }

    pub fn stats(&self) -> QueueStats {
        self.inner.state.lock().stats
    }

    pub fn progressive_state(&self) -> ProgressiveState {
        self.inner.progressive.state()
    }

    /// Whether the worker loop is running
    pub fn is_working(&self) -> bool {
        self.inner.worker_active.load(Ordering::Acquire)
    }

    /// Subscribe to scheduling and completion events
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageflow_cache::testing::{ScriptedDecoder, ScriptedResolver};
    use pageflow_cache::EngineConfig;
    use std::time::Duration;

    struct Harness {
        resolver: Arc<ScriptedResolver>,
        decoder: Arc<ScriptedDecoder>,
        cache: BitmapCache,
        pool: BlobPool,
        config: SharedConfig,
        queue: RenderQueue,
    }

    fn harness(len: usize, decode_delay: Duration) -> Harness {
        let resolver = Arc::new(ScriptedResolver::new());
        let decoder = Arc::new(ScriptedDecoder::new().with_delay(decode_delay));
        let cache = BitmapCache::new(decoder.clone(), 10);
        let pool = BlobPool::new(resolver.clone(), 64, 4);
        pool.switch_collection(Collection::pages("book", len));
        let mut config = EngineConfig::default();
        config.progressive_enabled = false;
        let config = SharedConfig::new(config);
        let queue = RenderQueue::new(cache.clone(), pool.clone(), config.clone(), Handle::current());
        Harness {
            resolver,
            decoder,
            cache,
            pool,
            config,
            queue,
        }
    }

    fn scheduled(rx: &mut broadcast::Receiver<QueueEvent>) -> Vec<(usize, Tier, Instant)> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let QueueEvent::Scheduled { index, tier, at, .. } = event {
                out.push((index, tier, at));
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_at_start_schedules_staggered_tiers() {
        let h = harness(100, Duration::ZERO);
        let mut rx = h.queue.subscribe();
        let start = Instant::now();

        h.queue.set_focus(0);
        tokio::time::sleep(Duration::from_millis(400)).await;

        let events = scheduled(&mut rx);
        let order: Vec<_> = events.iter().map(|(i, t, _)| (*i, *t)).collect();
        assert_eq!(
            order,
            vec![
                (0, Tier::Critical),
                (1, Tier::High),
                (2, Tier::Normal),
                (3, Tier::Normal),
                (4, Tier::Low),
                (5, Tier::Low),
            ]
        );

        let offsets: Vec<_> = events.iter().map(|(_, _, at)| *at - start).collect();
        assert_eq!(offsets[0], Duration::ZERO);
        assert_eq!(offsets[1], Duration::from_millis(30));
        assert_eq!(offsets[2], Duration::from_millis(150));
        assert_eq!(offsets[4], Duration::from_millis(300));

        assert_eq!(h.cache.len(), 6);
        assert_eq!(h.queue.task_status(5), Some(TaskStatus::Done));
        assert_eq!(h.queue.task_status(6), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiers_scheduled_in_order_around_middle() {
        let h = harness(100, Duration::ZERO);
        let mut rx = h.queue.subscribe();

        h.queue.set_focus(50);
        tokio::time::sleep(Duration::from_millis(400)).await;

        let events = scheduled(&mut rx);
        let at = |index: usize| events.iter().find(|(i, _, _)| *i == index).map(|e| e.2).unwrap();

        for high in [49, 51] {
            for normal in [47, 48, 52, 53] {
                assert!(at(high) < at(normal));
            }
        }
        for normal in [47, 48, 52, 53] {
            for low in [45, 46, 54, 55] {
                assert!(at(normal) < at(low));
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_change_cancels_pending_tiers() {
        let h = harness(100, Duration::from_millis(5));

        let first = h.queue.set_focus(10);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let second = h.queue.set_focus(60);
        assert!(first.is_stale());
        assert!(second.is_current());

        tokio::time::sleep(Duration::from_millis(400)).await;

        // Nothing from focus 10's NORMAL/LOW tiers was ever requested
        for index in [8, 12, 13, 7, 14, 6, 15, 5] {
            assert_eq!(h.resolver.calls_for(index), 0, "index {index}");
        }
        assert_eq!(h.resolver.calls_for(60), 1);
        assert!(h.cache.has(55));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_decode_is_discarded() {
        let h = harness(100, Duration::from_millis(100));
        let mut rx = h.queue.subscribe();

        h.queue.set_focus(20);
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.queue.set_focus(80);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!h.cache.has(20));
        let produced = h.decoder.produced_for(20);
        assert_eq!(produced.len(), 1);
        assert!(produced[0].is_closed());

        let mut discarded = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, QueueEvent::Discarded { index: 20, .. }) {
                discarded = true;
            }
        }
        assert!(discarded);
        assert_eq!(h.queue.task_status(20), Some(TaskStatus::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_focus_not_rescheduled() {
        let h = harness(100, Duration::ZERO);
        h.queue.set_focus(3);
        tokio::time::sleep(Duration::from_millis(400)).await;
        let decodes = h.decoder.call_count();

        let mut rx = h.queue.subscribe();
        h.queue.set_focus(3);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(scheduled(&mut rx).is_empty());
        assert_eq!(h.decoder.call_count(), decodes);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_decodes_one_at_a_time() {
        let h = harness(100, Duration::from_millis(50));
        h.queue.request(1, Tier::Low).unwrap();
        h.queue.request(2, Tier::Low).unwrap();
        h.queue.request(3, Tier::Low).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(h.decoder.call_count(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.decoder.calls(), vec![1, 2, 3]);
        assert!(!h.queue.is_working());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_isolated_and_retried() {
        let h = harness(100, Duration::ZERO);
        h.decoder.fail_index(2);

        h.queue.request(2, Tier::High).unwrap();
        h.queue.request(3, Tier::High).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.queue.task_status(2), Some(TaskStatus::Failed));
        assert!(h.cache.has(3));

        h.decoder.heal_index(2);
        h.queue.request(2, Tier::High).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.cache.has(2));
        assert_eq!(h.queue.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_request_out_of_range() {
        let h = harness(5, Duration::ZERO);
        assert_eq!(
            h.queue.request(5, Tier::High),
            Err(CacheError::OutOfRange { index: 5, len: 5 })
        );

        h.pool.close_collection();
        assert_eq!(h.queue.request(0, Tier::High), Err(CacheError::NoCollection));
    }

    #[tokio::test(start_paused = true)]
    async fn test_radii_reread_on_next_focus() {
        let h = harness(100, Duration::ZERO);
        h.config.update(|c| c.low_radius = 7).unwrap();

        h.queue.set_focus(50);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(h.cache.has(57) || h.resolver.calls_for(57) == 1);
        assert_eq!(h.resolver.calls_for(58), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot() {
        let h = harness(100, Duration::from_millis(1000));
        let token = h.queue.set_focus(40);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = h.queue.status();
        assert_eq!(status.current_focus, Some(40));
        assert_eq!(status.generation, token.value());
        // Focus is loading; HIGH and NORMAL are waiting
        assert_eq!(status.pending_count, 6);
        assert_eq!(status.cached_count, 0);

        let json = serde_json::to_value(status).unwrap();
        assert_eq!(json["currentFocus"], 40);
        assert_eq!(json["pendingCount"], 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all() {
        let h = harness(100, Duration::from_millis(1000));
        h.queue.set_focus(10);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cancelled = h.queue.cancel_all();
        assert_eq!(cancelled, 7);
        assert_eq!(h.queue.status().pending_count, 0);
        assert_eq!(h.queue.task_status(10), Some(TaskStatus::Cancelled));
        assert_eq!(h.queue.task_status(11), Some(TaskStatus::Cancelled));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!h.cache.has(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_change_during_progressive_batch() {
        let resolver = Arc::new(ScriptedResolver::new().with_delay(Duration::from_millis(100)));
        let cache = BitmapCache::new(Arc::new(ScriptedDecoder::new()), 10);
        let pool = BlobPool::new(resolver.clone(), 64, 4);
        pool.switch_collection(Collection::pages("book", 100));
        let config = SharedConfig::new(EngineConfig::default().with_progressive(3000, 5, Some(50)));
        let queue = RenderQueue::new(cache, pool, config, Handle::current());

        queue.set_focus(0);
        // Dwell over, first batch (6..=10) is fetching
        tokio::time::sleep(Duration::from_millis(3050)).await;
        assert!(queue.progressive_state().is_running);

        queue.set_focus(50);
        let state = queue.progressive_state();
        assert!(!state.is_running);
        assert_eq!(state.furthest_loaded, None);

        // Past the old batch and well into the new dwell
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(queue.progressive_state().furthest_loaded, None);

        tokio::time::sleep(Duration::from_millis(4000)).await;
        let resolved = resolver.indices();
        let first_progressive = resolved.iter().copied().find(|&i| i > 5);
        assert_eq!(first_progressive, Some(6));
        for index in 11..=15 {
            assert_eq!(resolver.calls_for(index), 0, "index {index}");
        }
        assert!(resolved.contains(&56));
        assert!(queue.progressive_state().furthest_loaded.is_some_and(|f| f >= 56));
    }
}
