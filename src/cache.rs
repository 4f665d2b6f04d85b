//! LRU cache for converted frames.
//!
//! Avoids re-running the seek/decode/scale/convert pipeline for frames
//! that clients request repeatedly (scrubbing, multiple observers). The
//! cache is flushed whenever the output format or the loaded source
//! changes, so entries never outlive the format they were produced in.

use std::collections::HashMap;

use crate::protocol::FrameBuffer;

pub const DEFAULT_CACHE_SIZE: usize = 30;

pub struct FrameCache {
    entries: HashMap<u32, FrameBuffer>,
    /// LRU order (most recently used last).
    lru_order: Vec<u32>,
    capacity: usize,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            lru_order: Vec::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Fetch a frame, marking it most recently used.
    ///
    /// The returned buffer shares its payload with the cache entry
    /// (`Bytes` is reference-counted), so it stays valid even if the
    /// entry is evicted before the caller finishes writing it out.
    pub fn get(&mut self, frame: u32) -> Option<FrameBuffer> {
        if self.entries.contains_key(&frame) {
            self.lru_order.retain(|&f| f != frame);
            self.lru_order.push(frame);
            self.entries.get(&frame).cloned()
        } else {
            None
        }
    }

    /// Insert a frame, evicting the least recently used entry at capacity.
    pub fn put(&mut self, frame: u32, buffer: FrameBuffer) {
        if self.entries.contains_key(&frame) {
            self.lru_order.retain(|&f| f != frame);
        } else if self.entries.len() >= self.capacity {
            let oldest = self.lru_order.remove(0);
            self.entries.remove(&oldest);
        }
        self.lru_order.push(frame);
        self.entries.insert(frame, buffer);
    }

    pub fn contains(&self, frame: u32) -> bool {
        self.entries.contains_key(&frame)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru_order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn buf(seq: u32) -> FrameBuffer {
        FrameBuffer {
            sequence: seq,
            timestamp_ms: 0,
            width: 2,
            height: 2,
            colorspace: crate::formats::ColorSpace::RGB24,
            flags: 0,
            data: Bytes::from(vec![seq as u8; 12]),
        }
    }

    #[test]
    fn eviction_is_least_recently_used() {
        let mut cache = FrameCache::new(2);
        cache.put(0, buf(0));
        cache.put(1, buf(1));
        cache.put(2, buf(2));
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
        assert!(cache.contains(2));
    }

    #[test]
    fn get_refreshes_lru_order() {
        let mut cache = FrameCache::new(2);
        cache.put(0, buf(0));
        cache.put(1, buf(1));
        // Touch 0 so 1 becomes the eviction candidate.
        assert!(cache.get(0).is_some());
        cache.put(2, buf(2));
        assert!(cache.contains(0));
        assert!(!cache.contains(1));
    }

    #[test]
    fn reinsert_does_not_grow() {
        let mut cache = FrameCache::new(2);
        cache.put(0, buf(0));
        cache.put(0, buf(0));
        cache.put(1, buf(1));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains(0));
    }

    #[test]
    fn clear_empties() {
        let mut cache = FrameCache::new(4);
        cache.put(0, buf(0));
        cache.put(1, buf(1));
        cache.clear();
        assert!(cache.is_empty());
        assert!(cache.get(0).is_none());
    }

    #[test]
    fn payload_survives_eviction() {
        let mut cache = FrameCache::new(1);
        cache.put(0, buf(0));
        let held = cache.get(0).unwrap();
        cache.put(1, buf(1));
        assert!(!cache.contains(0));
        assert_eq!(held.data.len(), 12);
        assert_eq!(held.data[0], 0);
    }
}
