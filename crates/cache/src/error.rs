//! Error types for cache and pool operations
//!
//! Every failure is local to the request that produced it. Errors are `Clone`
//! so a single-flight result can be handed to every waiter.

/// Failure of a single cache, pool or queue request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    /// The decode backend rejected the bytes (corrupt or unsupported data)
    #[error("decode failed for item {index}: {reason}")]
    Decode { index: usize, reason: String },

    /// The byte source could not be resolved or read
    #[error("byte source unavailable for item {index}: {reason}")]
    SourceUnavailable { index: usize, reason: String },

    /// The index lies outside the active collection
    #[error("item {index} out of range (len={len})")]
    OutOfRange { index: usize, len: usize },

    /// No collection has been opened
    #[error("no collection is open")]
    NoCollection,

    /// The request was superseded by a newer generation or collection
    #[error("request superseded by a newer generation")]
    Stale,

    /// The decode backend did not become ready in time
    #[error("decode backend temporarily unavailable")]
    BackendUnavailable,
}

impl CacheError {
    /// Stale results are discarded silently, not reported as faults
    pub fn is_stale(&self) -> bool {
        matches!(self, CacheError::Stale)
    }

    /// The item index the error refers to, if any
    pub fn index(&self) -> Option<usize> {
        match self {
            CacheError::Decode { index, .. }
            | CacheError::SourceUnavailable { index, .. }
            | CacheError::OutOfRange { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Failure reported by a decode backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Format not recognized or not supported
    #[error("unsupported image data: {0}")]
    Unsupported(String),

    /// Data recognized but damaged
    #[error("corrupt image data: {0}")]
    Corrupt(String),

    /// Backend worker is not running
    #[error("decode backend unavailable")]
    Unavailable,
}

impl DecodeError {
    /// Attach the item index the backend was decoding
    pub fn for_index(self, index: usize) -> CacheError {
        match self {
            DecodeError::Unavailable => CacheError::BackendUnavailable,
            other => CacheError::Decode {
                index,
                reason: other.to_string(),
            },
        }
    }
}
