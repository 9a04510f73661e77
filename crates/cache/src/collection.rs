//! Collections of items and their source kinds
//!
//! A collection is an ordered list of items (pages of a book, rows of a
//! directory listing). It is replaced wholesale when the user opens something
//! else; it is never patched in place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Identifier of a collection (book path or directory path)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CollectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

const ARCHIVE_EXTENSIONS: &[&str] = &["zip", "cbz", "rar", "cbr", "7z", "cb7"];

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "bmp", "avif", "jxl", "heic", "heif", "tiff", "tif",
    "svg", "ico",
];

/// What kind of thing an item is, as far as thumbnailing cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// A directory entry
    Directory,

    /// A raster image
    Image,

    /// An archive container (zip, rar, 7z and comic variants)
    Archive,

    /// Anything else; never thumbnailed
    Other,
}

impl SourceKind {
    /// Classify a path by its suffix, without touching the filesystem
    ///
    /// A trailing separator or a missing extension means a directory. An
    /// "extension" that is long or contains spaces or parentheses is taken to
    /// be part of a directory name such as `Vol. 2 (2019)`.
    pub fn sniff(path: &str) -> Self {
        if path.ends_with('/') || path.ends_with('\\') {
            return SourceKind::Directory;
        }

        let ext = match Path::new(path).extension() {
            Some(ext) => ext.to_string_lossy().to_lowercase(),
            None => return SourceKind::Directory,
        };

        if ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
            SourceKind::Archive
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            SourceKind::Image
        } else if ext.len() > 5 || ext.contains(' ') || ext.contains('(') || ext.contains(')') {
            SourceKind::Directory
        } else {
            SourceKind::Other
        }
    }

    /// Whether items of this kind get thumbnails
    pub fn is_thumbnail_candidate(self) -> bool {
        !matches!(self, SourceKind::Other)
    }
}

/// An ordered collection of items
#[derive(Debug, Clone)]
pub struct Collection {
    id: CollectionId,
    len: usize,
    kinds: Option<Arc<[SourceKind]>>,
}

impl Collection {
    /// A book of `len` image pages
    pub fn pages(id: impl Into<CollectionId>, len: usize) -> Self {
        Self {
            id: id.into(),
            len,
            kinds: None,
        }
    }

    /// A directory listing; each entry's kind is sniffed from its name
    pub fn from_entries<I, S>(id: impl Into<CollectionId>, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kinds: Arc<[SourceKind]> = entries
            .into_iter()
            .map(|entry| SourceKind::sniff(entry.as_ref()))
            .collect();
        Self {
            id: id.into(),
            len: kinds.len(),
            kinds: Some(kinds),
        }
    }

    pub fn id(&self) -> &CollectionId {
        &self.id
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, index: usize) -> bool {
        index < self.len
    }

    /// Kind of the item at `index`; `None` when out of range
    pub fn kind(&self, index: usize) -> Option<SourceKind> {
        if !self.contains(index) {
            return None;
        }
        match &self.kinds {
            Some(kinds) => kinds.get(index).copied(),
            None => Some(SourceKind::Image),
        }
    }
}

/// Indices at distance `from..=to` around `center`, nearest first
///
/// Each distance yields the forward index before the backward one
/// (`center+d`, `center-d`). Indices below zero or at/after `len` are skipped.
/// A `from` of zero includes `center` itself.
pub fn outward_indices(center: usize, from: usize, to: usize, len: usize) -> Vec<usize> {
    let mut out = Vec::new();
    for distance in from..=to {
        if distance == 0 {
            if center < len {
                out.push(center);
            }
            continue;
        }
        if let Some(forward) = center.checked_add(distance) {
            if forward < len {
                out.push(forward);
            }
        }
        if let Some(backward) = center.checked_sub(distance) {
            if backward < len {
                out.push(backward);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_directories() {
        assert_eq!(SourceKind::sniff("comics/"), SourceKind::Directory);
        assert_eq!(SourceKind::sniff("C:\\manga\\"), SourceKind::Directory);
        assert_eq!(SourceKind::sniff("comics/chapter01"), SourceKind::Directory);
        assert_eq!(SourceKind::sniff("books/Vol. 2 (2019)"), SourceKind::Directory);
    }

    #[test]
    fn test_sniff_archives_and_images() {
        assert_eq!(SourceKind::sniff("a/b.CBZ"), SourceKind::Archive);
        assert_eq!(SourceKind::sniff("a/b.7z"), SourceKind::Archive);
        assert_eq!(SourceKind::sniff("a/001.JPG"), SourceKind::Image);
        assert_eq!(SourceKind::sniff("a/001.webp"), SourceKind::Image);
        assert_eq!(SourceKind::sniff("a/cover.avif"), SourceKind::Image);
    }

    #[test]
    fn test_sniff_plain_files() {
        assert_eq!(SourceKind::sniff("notes.txt"), SourceKind::Other);
        assert_eq!(SourceKind::sniff("index.json"), SourceKind::Other);
        assert!(!SourceKind::Other.is_thumbnail_candidate());
        assert!(SourceKind::Archive.is_thumbnail_candidate());
    }

    #[test]
    fn test_collection_pages() {
        let book = Collection::pages("book.cbz", 3);
        assert_eq!(book.len(), 3);
        assert_eq!(book.kind(2), Some(SourceKind::Image));
        assert_eq!(book.kind(3), None);
        assert_eq!(book.id().as_str(), "book.cbz");
    }

    #[test]
    fn test_collection_from_entries() {
        let dir = Collection::from_entries("/library", ["a.zip", "b.png", "c.txt", "sub/"]);
        assert_eq!(dir.len(), 4);
        assert_eq!(dir.kind(0), Some(SourceKind::Archive));
        assert_eq!(dir.kind(1), Some(SourceKind::Image));
        assert_eq!(dir.kind(2), Some(SourceKind::Other));
        assert_eq!(dir.kind(3), Some(SourceKind::Directory));
    }

    #[test]
    fn test_outward_indices_order() {
        assert_eq!(outward_indices(10, 0, 2, 100), vec![10, 11, 9, 12, 8]);
        assert_eq!(outward_indices(10, 2, 3, 100), vec![12, 8, 13, 7]);
    }

    #[test]
    fn test_outward_indices_clips_bounds() {
        assert_eq!(outward_indices(0, 1, 3, 100), vec![1, 2, 3]);
        assert_eq!(outward_indices(9, 0, 2, 10), vec![9, 8, 7]);
        assert!(outward_indices(20, 0, 1, 10).is_empty());
    }
}
