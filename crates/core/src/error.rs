//! Errors from building an engine

use pageflow_cache::ConfigError;

/// Why a [`PrefetchEngine`](crate::PrefetchEngine) could not be created
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The configuration does not validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Constructed outside a tokio runtime without an explicit handle
    #[error("no tokio runtime available; use PrefetchEngine::on_runtime")]
    NoRuntime,
}
