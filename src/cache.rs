//! Bounded cache of decoded, normalized images
//!
//! Keyed by file path, strict least-recently-used eviction. The cache owns
//! every image it holds; `get` hands out a borrow, never ownership, so
//! callers cannot retain entries past invalidation. Single-writer: only the
//! interactive foreground path mutates this cache, the background preview
//! run keeps its own store.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use crate::render::DecodedImage;

/// Default number of full-resolution decoded images kept around
pub const DEFAULT_CAPACITY: usize = 5;

/// Least-recently-used cache of decoded images.
pub struct DecodedCache {
    capacity: usize,
    /// Most recently used at the back
    entries: VecDeque<(PathBuf, DecodedImage)>,
}

impl DecodedCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be positive");
        DecodedCache { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    /// Look up a decoded image, marking it most recently used.
    pub fn get(&mut self, path: &Path) -> Option<&DecodedImage> {
        let idx = self.entries.iter().position(|(p, _)| p == path)?;
        let entry = self.entries.remove(idx)?;
        self.entries.push_back(entry);
        self.entries.back().map(|(_, image)| image)
    }

    /// Insert a decoded image, evicting the least recently used entry when
    /// the cache is full. Re-inserting an existing path replaces it.
    pub fn put(&mut self, path: PathBuf, image: DecodedImage) {
        if let Some(idx) = self.entries.iter().position(|(p, _)| *p == path) {
            self.entries.remove(idx);
        }
        self.entries.push_back((path, image));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Drop a cached entry, e.g. after the file's header was patched on
    /// disk and the decoded data went stale.
    pub fn invalidate(&mut self, path: &Path) {
        if let Some(idx) = self.entries.iter().position(|(p, _)| p == path) {
            self.entries.remove(idx);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.iter().any(|(p, _)| p == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DecodedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RawImage;
    use crate::render::normalize;

    fn image(tag: f32) -> DecodedImage {
        normalize(RawImage {
            width: 2,
            height: 1,
            channels: 1,
            samples: vec![0.0, tag],
            header_text: String::new(),
        })
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("/frames/{name}.xisf"))
    }

    #[test]
    fn capacity_is_never_exceeded_and_oldest_goes_first() {
        let mut cache = DecodedCache::with_capacity(5);
        for i in 0..6 {
            cache.put(path(&format!("f{i}")), image(i as f32 + 1.0));
            assert!(cache.len() <= 5);
        }
        // Six distinct puts into a five-slot cache: f0 is gone.
        assert!(!cache.contains(&path("f0")));
        for i in 1..6 {
            assert!(cache.get(&path(&format!("f{i}"))).is_some());
        }
    }

    #[test]
    fn get_promotes_against_eviction() {
        let mut cache = DecodedCache::with_capacity(3);
        cache.put(path("a"), image(1.0));
        cache.put(path("b"), image(2.0));
        cache.put(path("c"), image(3.0));

        // Touch the oldest, then overflow: the untouched one is evicted.
        assert!(cache.get(&path("a")).is_some());
        cache.put(path("d"), image(4.0));
        assert!(cache.contains(&path("a")));
        assert!(!cache.contains(&path("b")));
    }

    #[test]
    fn reinsert_replaces_without_growing() {
        let mut cache = DecodedCache::with_capacity(3);
        cache.put(path("a"), image(1.0));
        cache.put(path("a"), image(2.0));
        assert_eq!(cache.len(), 1);
        let got = cache.get(&path("a")).unwrap();
        assert_eq!(got.samples()[1], 1.0); // normalized max of the newer entry
    }

    #[test]
    fn invalidate_and_clear() {
        let mut cache = DecodedCache::new();
        cache.put(path("a"), image(1.0));
        cache.put(path("b"), image(2.0));
        cache.invalidate(&path("a"));
        assert!(!cache.contains(&path("a")));
        assert!(cache.contains(&path("b")));
        cache.clear();
        assert!(cache.is_empty());
    }
}
