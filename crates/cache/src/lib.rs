//! Pageflow Cache Library
//!
//! Decoded bitmap cache and encoded-bytes pool for the prefetch engine, plus
//! the pieces they share: generation tokens, collections, the byte-source and
//! decode-backend seams, backend readiness, configuration and change
//! notification.

pub mod bitmap;
pub mod bitmap_cache;
pub mod collection;
pub mod config;
pub mod error;
pub mod generation;
pub mod notify;
pub mod overlay;
pub mod pool;
pub mod readiness;
pub mod source;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use bitmap::Bitmap;
pub use bitmap_cache::{BitmapCache, CacheChange, CacheEntry, CacheStats};
pub use collection::{outward_indices, Collection, CollectionId, SourceKind};
pub use config::{ConfigError, EngineConfig, SharedConfig};
pub use error::{CacheError, CacheResult, DecodeError};
pub use generation::{GenerationCounter, GenerationToken};
pub use notify::Notifier;
pub use overlay::{
    EventOutcome, OverlayChange, UpscaleOverlay, UpscaleReadyEvent, UpscaleStatus, UpscaledImage,
};
pub use pool::{BlobPool, PoolStats, PooledImage};
pub use readiness::BackendReadiness;
pub use source::{ByteSource, ByteSourceResolver, DecodeBackend, FileListResolver, ImageDecoder};
