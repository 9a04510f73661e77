//! Decode backend readiness
//!
//! The backend publishes readiness once. Callers await it directly with a
//! bounded timeout instead of polling.

use crate::error::{CacheError, CacheResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Published-once readiness signal for the decode backend
#[derive(Debug, Clone)]
pub struct BackendReadiness {
    tx: Arc<watch::Sender<bool>>,
}

impl BackendReadiness {
    /// A signal that starts out not ready
    pub fn pending() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that is already ready
    pub fn ready() -> Self {
        let readiness = Self::pending();
        readiness.mark_ready();
        readiness
    }

    /// Publish readiness; waking every waiter
    pub fn mark_ready(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the backend is ready, at most `timeout`
    ///
    /// Returns [`CacheError::BackendUnavailable`] when the wait runs out.
    pub async fn wait(&self, timeout: Duration) -> CacheResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let mut rx = self.tx.subscribe();
        let waited = tokio::time::timeout(timeout, async move {
            rx.wait_for(|ready| *ready).await.map(|_| ())
        })
        .await;

        match waited {
            Ok(Ok(())) => Ok(()),
            _ => {
                tracing::warn!(?timeout, "decode backend not ready in time");
                Err(CacheError::BackendUnavailable)
            }
        }
    }
}

impl Default for BackendReadiness {
    fn default() -> Self {
        Self::ready()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ready_returns_immediately() {
        let readiness = BackendReadiness::ready();
        assert!(readiness.is_ready());
        assert!(readiness.wait(Duration::from_millis(1)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out() {
        let readiness = BackendReadiness::pending();
        let result = readiness.wait(Duration::from_millis(2000)).await;
        assert_eq!(result, Err(CacheError::BackendUnavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_mark_ready() {
        let readiness = BackendReadiness::pending();
        let publisher = readiness.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            publisher.mark_ready();
        });

        assert!(readiness.wait(Duration::from_secs(2)).await.is_ok());
    }
}
