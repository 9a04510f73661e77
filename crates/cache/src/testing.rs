//! Scripted resolver and decoder doubles
//!
//! Available to this crate's tests and, through the `test-support` feature,
//! to downstream crates. Byte sources produced here encode their item index
//! so the decoder can attribute every call.

use crate::bitmap::Bitmap;
use crate::collection::CollectionId;
use crate::error::{CacheError, CacheResult, DecodeError};
use crate::source::{ByteSource, ByteSourceResolver, DecodeBackend};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// An in-memory byte source tagged with `index`
pub fn blob_for(index: usize) -> ByteSource {
    ByteSource::Blob(Arc::from(encode_index(index)))
}

fn encode_index(index: usize) -> Vec<u8> {
    (index as u64).to_le_bytes().to_vec()
}

fn decode_index(bytes: &[u8]) -> Option<usize> {
    let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(raw) as usize)
}

/// Resolver that hands out [`blob_for`] sources and records every call
#[derive(Debug, Default)]
pub struct ScriptedResolver {
    delay: Duration,
    calls: Mutex<Vec<(CollectionId, usize)>>,
    missing: Mutex<HashSet<usize>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every resolution by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make `index` resolve to [`CacheError::SourceUnavailable`]
    pub fn fail_index(&self, index: usize) {
        self.missing.lock().insert(index);
    }

    pub fn calls(&self) -> Vec<(CollectionId, usize)> {
        self.calls.lock().clone()
    }

    /// Resolved indices in call order
    pub fn indices(&self) -> Vec<usize> {
        self.calls.lock().iter().map(|(_, index)| *index).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, index: usize) -> usize {
        self.calls.lock().iter().filter(|(_, i)| *i == index).count()
    }
}

impl ByteSourceResolver for ScriptedResolver {
    fn resolve(
        &self,
        collection: &CollectionId,
        index: usize,
    ) -> BoxFuture<'static, CacheResult<ByteSource>> {
        self.calls.lock().push((collection.clone(), index));
        let missing = self.missing.lock().contains(&index);
        let delay = self.delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if missing {
                return Err(CacheError::SourceUnavailable {
                    index,
                    reason: "scripted failure".to_string(),
                });
            }
            Ok(blob_for(index))
        }
        .boxed()
    }
}

/// Decoder that produces 1x1 bitmaps and keeps a clone of each one
#[derive(Debug, Default)]
pub struct ScriptedDecoder {
    delay: Duration,
    calls: Mutex<Vec<usize>>,
    failing: Mutex<HashSet<usize>>,
    produced: Arc<Mutex<Vec<(usize, Bitmap)>>>,
}

impl ScriptedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every decode by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make decodes of `index` fail as corrupt data
    pub fn fail_index(&self, index: usize) {
        self.failing.lock().insert(index);
    }

    pub fn heal_index(&self, index: usize) {
        self.failing.lock().remove(&index);
    }

    /// Decoded indices in call order
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls_for(&self, index: usize) -> usize {
        self.calls.lock().iter().filter(|&&i| i == index).count()
    }

    /// Every bitmap produced for `index`, oldest first
    pub fn produced_for(&self, index: usize) -> Vec<Bitmap> {
        self.produced
            .lock()
            .iter()
            .filter(|(i, _)| *i == index)
            .map(|(_, bitmap)| bitmap.clone())
            .collect()
    }
}

impl DecodeBackend for ScriptedDecoder {
    fn decode(&self, bytes: Arc<[u8]>) -> BoxFuture<'static, Result<Bitmap, DecodeError>> {
        let Some(index) = decode_index(&bytes) else {
            return futures::future::ready(Err(DecodeError::Unsupported(
                "not a scripted blob".to_string(),
            )))
            .boxed();
        };

        self.calls.lock().push(index);
        let fails = self.failing.lock().contains(&index);
        let delay = self.delay;
        let produced = self.produced.clone();

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if fails {
                return Err(DecodeError::Corrupt(format!("scripted failure for {index}")));
            }
            let bitmap = Bitmap::new(vec![index as u8, 0, 0, 255], 1, 1);
            produced.lock().push((index, bitmap.clone()));
            Ok(bitmap)
        }
        .boxed()
    }
}
