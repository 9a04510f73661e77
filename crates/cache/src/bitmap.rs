//! Decoded bitmap handles with explicit release
//!
//! A [`Bitmap`] owns decoded RGBA pixels. Clones share the same pixels, and
//! [`Bitmap::close`] releases them for every clone at once. The cache and the
//! stale-result path are the only callers of `close`; consumers holding a
//! clone after eviction simply observe a closed handle.

use parking_lot::Mutex;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

struct BitmapInner {
    width: u32,
    height: u32,
    byte_size: usize,
    pixels: Mutex<Option<Vec<u8>>>,
    closed: AtomicBool,
}

/// Shared handle to a decoded bitmap
#[derive(Clone)]
pub struct Bitmap {
    inner: Arc<BitmapInner>,
}

impl Bitmap {
    /// Wrap decoded RGBA pixels
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            inner: Arc::new(BitmapInner {
                width,
                height,
                byte_size: pixels.len(),
                pixels: Mutex::new(Some(pixels)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.inner.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.inner.height
    }

    /// Size of the pixel buffer at decode time, in bytes
    pub fn byte_size(&self) -> usize {
        self.inner.byte_size
    }

    /// Whether the pixels have been released
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Run `f` over the pixels while they are still held
    ///
    /// Returns `None` once the bitmap has been closed.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let pixels = self.inner.pixels.lock();
        pixels.as_deref().map(f)
    }

    /// Release the pixels
    ///
    /// Idempotent. Returns `true` only for the call that performed the
    /// release.
    pub fn close(&self) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.pixels.lock().take();
        true
    }

    /// Whether two handles refer to the same bitmap
    pub fn ptr_eq(&self, other: &Bitmap) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.inner.width)
            .field("height", &self.inner.height)
            .field("byte_size", &self.inner.byte_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}
