//! Progressive idle loading
//!
//! When the user stays on one focus index past the dwell time, the warm
//! window is extended forward beyond the LOW tier. The loader only fills the
//! blob pool; decoded bitmaps stay reserved for the tiers around the focus.
//!
//! Every focus change restarts the loader: the dwell timer and any batch in
//! progress are dropped and the furthest loaded index is forgotten.

use crate::queue::QueueEvent;
use pageflow_cache::{BlobPool, EngineConfig, GenerationToken, Notifier};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Progress of the idle loader, for UI display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressiveState {
    /// Whether batches are being loaded right now
    pub is_running: bool,

    /// Whole seconds left before loading starts, while the dwell timer runs
    pub countdown: Option<u64>,

    /// Furthest index pooled since the last focus change
    pub furthest_loaded: Option<usize>,
}

/// The window the loader extends into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressivePlan {
    pub focus: usize,
    /// First index loaded, just past the LOW tier
    pub start: usize,
    /// One past the last index loaded
    pub end: usize,
    pub batch_size: usize,
    pub dwell: Duration,
}

impl ProgressivePlan {
    /// Plan the idle load for `focus` in a collection of `len` items
    pub fn new(focus: usize, len: usize, config: &EngineConfig) -> Self {
        let start = focus.saturating_add(config.low_radius).saturating_add(1);
        let end = match config.progressive_max_pages {
            Some(max) => start.saturating_add(max).min(len),
            None => len,
        };
        Self {
            focus,
            start,
            end: end.max(start),
            batch_size: config.progressive_batch_size.max(1),
            dwell: config.dwell(),
        }
    }

    pub fn indices(&self) -> std::ops::Range<usize> {
        self.start..self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

struct LoaderState {
    progress: ProgressiveState,
    task: Option<JoinHandle<()>>,
}

struct LoaderInner {
    pool: BlobPool,
    state: Mutex<LoaderState>,
    events: Notifier<QueueEvent>,
    runtime: Handle,
}

impl LoaderInner {
    /// Apply `edit` unless `token` went stale, then publish the new state
    fn update(&self, token: &GenerationToken, edit: impl FnOnce(&mut ProgressiveState)) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if token.is_stale() {
                return false;
            }
            edit(&mut state.progress);
            state.progress
        };
        self.events.emit(QueueEvent::Progressive(snapshot));
        true
    }
}

/// Dwell-triggered loader extending the warm window
#[derive(Clone)]
pub struct ProgressiveLoader {
    inner: Arc<LoaderInner>,
}

impl ProgressiveLoader {
    pub fn new(pool: BlobPool, events: Notifier<QueueEvent>, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                pool,
                state: Mutex::new(LoaderState {
                    progress: ProgressiveState::default(),
                    task: None,
                }),
                events,
                runtime,
            }),
        }
    }

    /// Drop the current run and arm the dwell timer for `focus`
    ///
    /// Does nothing beyond the reset when progressive loading is disabled or
    /// there is nothing past the LOW tier.
    pub fn restart(&self, focus: usize, len: usize, token: GenerationToken, config: &EngineConfig) {
        self.cancel();

        let plan = ProgressivePlan::new(focus, len, config);
        if !config.progressive_enabled || plan.is_empty() {
            return;
        }

        let task = self.inner.runtime.spawn(run(self.inner.clone(), plan, token));
        self.inner.state.lock().task = Some(task);
    }

    /// Stop the dwell timer and any batch in progress, and reset the state
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.progress = ProgressiveState::default();
    }

    pub fn state(&self) -> ProgressiveState {
        self.inner.state.lock().progress
    }
}

fn whole_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

async fn run(inner: Arc<LoaderInner>, plan: ProgressivePlan, token: GenerationToken) {
    let deadline = Instant::now() + plan.dwell;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let countdown = whole_seconds(remaining);
        if !inner.update(&token, |s| s.countdown = Some(countdown)) {
            return;
        }
        // Sleep until the displayed countdown drops by one
        let step = remaining.saturating_sub(Duration::from_secs(countdown - 1));
        tokio::time::sleep(step).await;
    }

    if !inner.update(&token, |s| {
        s.countdown = None;
        s.is_running = true;
    }) {
        return;
    }
    tracing::debug!(
        focus = plan.focus,
        start = plan.start,
        end = plan.end,
        generation = token.value(),
        "progressive loading started"
    );

    let indices: Vec<usize> = plan.indices().collect();
    for batch in indices.chunks(plan.batch_size) {
        let loads = batch.iter().map(|&index| {
            let pool = inner.pool.clone();
            let token = token.clone();
            async move {
                if token.is_stale() {
                    return None;
                }
                match pool.get(index).await {
                    Ok(_) => Some(index),
                    Err(err) if err.is_stale() => None,
                    Err(err) => {
                        tracing::debug!(index, error = %err, "progressive load skipped item");
                        None
                    }
                }
            }
        });
        let loaded = futures::future::join_all(loads).await;

        let furthest = loaded.into_iter().flatten().max();
        let applied = inner.update(&token, |s| {
            if let Some(furthest) = furthest {
                s.furthest_loaded = Some(s.furthest_loaded.map_or(furthest, |f| f.max(furthest)));
            }
        });
        if !applied {
            tracing::debug!(generation = token.value(), "progressive loading superseded");
            return;
        }
    }

    inner.update(&token, |s| s.is_running = false);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pageflow_cache::testing::ScriptedResolver;
    use pageflow_cache::{Collection, GenerationCounter};

    fn setup(len: usize) -> (Arc<ScriptedResolver>, BlobPool, ProgressiveLoader) {
        let resolver = Arc::new(ScriptedResolver::new());
        let pool = BlobPool::new(resolver.clone(), 128, 4);
        pool.switch_collection(Collection::pages("book", len));
        let loader = ProgressiveLoader::new(pool.clone(), Notifier::new(), Handle::current());
        (resolver, pool, loader)
    }

    #[test]
    fn test_plan_starts_past_low_tier() {
        let config = EngineConfig::default();
        let plan = ProgressivePlan::new(10, 1000, &config);
        assert_eq!(plan.start, 16);
        assert_eq!(plan.end, 66);
    }

    #[test]
    fn test_plan_clipped_to_collection() {
        let config = EngineConfig::default();
        let plan = ProgressivePlan::new(90, 100, &config);
        assert_eq!(plan.indices(), 96..100);

        let tail = ProgressivePlan::new(97, 100, &config);
        assert!(tail.is_empty());
    }

    #[test]
    fn test_plan_all_remaining() {
        let config = EngineConfig::default().with_progressive(3000, 5, None);
        let plan = ProgressivePlan::new(0, 500, &config);
        assert_eq!(plan.indices(), 6..500);
    }

    #[test]
    fn test_whole_seconds() {
        assert_eq!(whole_seconds(Duration::from_secs(3)), 3);
        assert_eq!(whole_seconds(Duration::from_millis(2500)), 3);
        assert_eq!(whole_seconds(Duration::from_millis(1)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_then_load() {
        let (resolver, pool, loader) = setup(100);
        let counter = GenerationCounter::new();
        let config = EngineConfig::default().with_progressive(3000, 5, Some(12));

        loader.restart(0, 100, counter.advance(), &config);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(loader.state().countdown, Some(3));
        assert_eq!(resolver.call_count(), 0);

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(loader.state().countdown, Some(2));

        tokio::time::sleep(Duration::from_secs(3)).await;
        let state = loader.state();
        assert!(!state.is_running);
        assert_eq!(state.countdown, None);
        assert_eq!(state.furthest_loaded, Some(17));

        let mut loaded = resolver.indices();
        loaded.sort_unstable();
        assert_eq!(loaded, (6..18).collect::<Vec<_>>());
        assert!(pool.contains(6));
        assert!(!pool.contains(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_dwell() {
        let (resolver, _pool, loader) = setup(100);
        let counter = GenerationCounter::new();
        let config = EngineConfig::default();

        loader.restart(0, 100, counter.advance(), &config);
        tokio::time::sleep(Duration::from_millis(2500)).await;

        loader.restart(1, 100, counter.advance(), &config);
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(resolver.call_count(), 0);
        assert_eq!(loader.state().countdown, Some(1));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(resolver.indices().first(), Some(&7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_stops_loading() {
        let (resolver, _pool, loader) = setup(100);
        let counter = GenerationCounter::new();
        let config = EngineConfig::default();

        loader.restart(0, 100, counter.advance(), &config);
        counter.advance();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(resolver.call_count(), 0);
        assert_eq!(loader.state().furthest_loaded, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_does_nothing() {
        let (resolver, _pool, loader) = setup(100);
        let counter = GenerationCounter::new();
        let mut config = EngineConfig::default();
        config.progressive_enabled = false;

        loader.restart(0, 100, counter.advance(), &config);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(resolver.call_count(), 0);
        assert_eq!(loader.state(), ProgressiveState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_resets_state() {
        let (_resolver, _pool, loader) = setup(100);
        let counter = GenerationCounter::new();

        loader.restart(0, 100, counter.advance(), &EngineConfig::default());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(loader.state().countdown.is_some());

        loader.cancel();
        assert_eq!(loader.state(), ProgressiveState::default());
    }
}
