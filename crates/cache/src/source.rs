//! Byte sources and the decode backend seam
//!
//! The engine never reads archives or walks directories itself. A
//! [`ByteSourceResolver`] turns an item index into loadable bytes, and a
//! [`DecodeBackend`] turns those bytes into a [`Bitmap`]. Both are external
//! collaborators; this module also ships a file-list resolver and an
//! `image`-crate decoder so the engine runs without a UI.

use crate::bitmap::Bitmap;
use crate::collection::CollectionId;
use crate::error::{CacheError, CacheResult, DecodeError};
use futures::future::{BoxFuture, FutureExt};
use std::path::PathBuf;
use std::sync::Arc;

/// Where an item's encoded bytes live
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Bytes already in memory (extracted from an archive, fetched, ...)
    Blob(Arc<[u8]>),

    /// A file on disk
    File(PathBuf),
}

impl ByteSource {
    /// In-memory size, when known without I/O
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            ByteSource::Blob(bytes) => Some(bytes.len()),
            ByteSource::File(_) => None,
        }
    }

    /// Load the encoded bytes
    pub async fn read(&self, index: usize) -> CacheResult<Arc<[u8]>> {
        match self {
            ByteSource::Blob(bytes) => Ok(bytes.clone()),
            ByteSource::File(path) => tokio::fs::read(path)
                .await
                .map(Arc::from)
                .map_err(|e| CacheError::SourceUnavailable {
                    index,
                    reason: format!("{}: {e}", path.display()),
                }),
        }
    }
}

/// Resolves an item of a collection to its byte source
pub trait ByteSourceResolver: Send + Sync + 'static {
    fn resolve(
        &self,
        collection: &CollectionId,
        index: usize,
    ) -> BoxFuture<'static, CacheResult<ByteSource>>;
}

/// Decodes encoded bytes into a bitmap
///
/// Implementations may decode on another thread; the returned future only
/// has to be `Send`. Cancellation is by dropping or discarding the result.
pub trait DecodeBackend: Send + Sync + 'static {
    fn decode(&self, bytes: Arc<[u8]>) -> BoxFuture<'static, Result<Bitmap, DecodeError>>;
}

/// Resolver over a fixed, ordered list of files
///
/// Any collection id is accepted; the list itself is the collection.
#[derive(Debug, Clone)]
pub struct FileListResolver {
    paths: Arc<[PathBuf]>,
}

impl FileListResolver {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl ByteSourceResolver for FileListResolver {
    fn resolve(
        &self,
        _collection: &CollectionId,
        index: usize,
    ) -> BoxFuture<'static, CacheResult<ByteSource>> {
        let resolved = match self.paths.get(index) {
            Some(path) => Ok(ByteSource::File(path.clone())),
            None => Err(CacheError::OutOfRange {
                index,
                len: self.paths.len(),
            }),
        };
        futures::future::ready(resolved).boxed()
    }
}

/// Decode backend built on the `image` crate
///
/// Decoding runs on tokio's blocking pool and yields RGBA8 pixels.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl DecodeBackend for ImageDecoder {
    fn decode(&self, bytes: Arc<[u8]>) -> BoxFuture<'static, Result<Bitmap, DecodeError>> {
        async move {
            let decoded = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes))
                .await
                .map_err(|_| DecodeError::Unavailable)?;

            let image = decoded.map_err(|e| match e {
                image::ImageError::Unsupported(inner) => DecodeError::Unsupported(inner.to_string()),
                other => DecodeError::Corrupt(other.to_string()),
            })?;

            let rgba = image.to_rgba8();
            let (width, height) = rgba.dimensions();
            Ok(Bitmap::new(rgba.into_raw(), width, height))
        }
        .boxed()
    }
}
