//! Generation tokens for cooperative cancellation
//!
//! A [`GenerationCounter`] holds the one "current" generation. Work captures a
//! [`GenerationToken`] when it is scheduled and checks it at every resumption
//! point; once the counter advances, the captured token reports stale and the
//! work must not touch shared state any more.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

/// Monotonic generation counter
///
/// Clones share the same underlying counter.
///
/// # Example
///
/// ```
/// use pageflow_cache::GenerationCounter;
///
/// let counter = GenerationCounter::new();
/// let token = counter.advance();
/// assert!(token.is_current());
///
/// counter.advance();
/// assert!(token.is_stale());
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    /// Create a counter at generation 0
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation value
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Advance to a fresh generation and return its token
    ///
    /// Every token captured before this call becomes stale. Values are never
    /// reused.
    pub fn advance(&self) -> GenerationToken {
        let value = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        GenerationToken {
            value,
            current: self.current.clone(),
        }
    }

    /// Capture a token for the current generation
    pub fn token(&self) -> GenerationToken {
        self.token_at(self.current())
    }

    /// Rebuild a token for a previously captured generation value
    pub fn token_at(&self, value: u64) -> GenerationToken {
        GenerationToken {
            value,
            current: self.current.clone(),
        }
    }
}

/// A captured generation
#[derive(Debug, Clone)]
pub struct GenerationToken {
    value: u64,
    current: Arc<AtomicU64>,
}

impl GenerationToken {
    /// A token bound to a private counter; it never goes stale
    pub fn detached() -> Self {
        GenerationCounter::new().token()
    }

    /// The generation value captured by this token
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether the owning counter still sits at this generation
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.value
    }

    /// Whether the owning counter has moved past this generation
    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }
}
