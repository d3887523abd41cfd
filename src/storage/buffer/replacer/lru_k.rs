use std::collections::{HashMap, VecDeque};
use parking_lot::Mutex;

use crate::common::types::FrameId;

/// LRU-K page replacement policy.
///
/// Tracks up to the K most recent access timestamps of every frame. Frames
/// with fewer than K recorded accesses have infinite backward-K distance and
/// form the *history* set, evicted FIFO by first access. Frames with at
/// least K accesses form the *cache* set, evicted by earliest K-th most
/// recent access. History is always drained before cache.
pub struct LruKReplacer {
    inner: Mutex<LruKInner>,
    k: usize,
    num_frames: usize,
}

struct FrameRecord {
    /// Most recent access timestamps, oldest first, capped at K
    history: VecDeque<u64>,
    evictable: bool,
}

struct LruKInner {
    records: HashMap<FrameId, FrameRecord>,
    current_timestamp: u64,
    /// Count of evictable tracked frames
    curr_size: usize,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            inner: Mutex::new(LruKInner {
                records: HashMap::with_capacity(num_frames),
                current_timestamp: 0,
                curr_size: 0,
            }),
            k,
            num_frames,
        }
    }

    /// Record an access to the given frame at the current logical time.
    ///
    /// A frame seen for the first time starts tracked and non-evictable.
    pub fn record_access(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.num_frames,
            "invalid frame id {} in record_access",
            frame_id
        );
        let mut inner = self.inner.lock();
        inner.current_timestamp += 1;
        let now = inner.current_timestamp;
        let k = self.k;

        let record = inner.records.entry(frame_id).or_insert_with(|| FrameRecord {
            history: VecDeque::with_capacity(k),
            evictable: false,
        });
        record.history.push_back(now);
        if record.history.len() > k {
            record.history.pop_front();
        }
    }

    /// Toggle whether the frame may be chosen as an eviction victim
    pub fn set_evictable(&self, frame_id: FrameId, evictable: bool) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;
        let record = inner
            .records
            .get_mut(&frame_id)
            .unwrap_or_else(|| panic!("set_evictable on untracked frame {}", frame_id));

        if evictable && !record.evictable {
            record.evictable = true;
            inner.curr_size += 1;
        } else if !evictable && record.evictable {
            record.evictable = false;
            inner.curr_size -= 1;
        }
    }

    /// Choose and remove the eviction victim.
    ///
    /// Returns None when no tracked frame is evictable.
    pub fn evict(&self) -> Option<FrameId> {
        let mut inner = self.inner.lock();

        // History frames (fewer than K accesses) go first, oldest first access wins.
        let mut victim: Option<(FrameId, u64)> = None;
        for (&frame_id, record) in inner.records.iter() {
            if !record.evictable || record.history.len() >= self.k {
                continue;
            }
            let first_access = *record.history.front().expect("tracked frame has accesses");
            if victim.map_or(true, |(_, ts)| first_access < ts) {
                victim = Some((frame_id, first_access));
            }
        }

        // Otherwise fall back to the cache set: earliest K-th most recent access.
        if victim.is_none() {
            for (&frame_id, record) in inner.records.iter() {
                if !record.evictable || record.history.len() < self.k {
                    continue;
                }
                let kth_recent = *record.history.front().expect("tracked frame has accesses");
                if victim.map_or(true, |(_, ts)| kth_recent < ts) {
                    victim = Some((frame_id, kth_recent));
                }
            }
        }

        let (frame_id, _) = victim?;
        inner.records.remove(&frame_id);
        inner.curr_size -= 1;
        Some(frame_id)
    }

    /// Drop a frame from the replacer entirely.
    ///
    /// Removing an untracked frame is a no-op; removing a pinned
    /// (non-evictable) frame is a programmer error.
    pub fn remove(&self, frame_id: FrameId) {
        assert!(
            (frame_id as usize) < self.num_frames,
            "invalid frame id {} in remove",
            frame_id
        );
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get(&frame_id) {
            assert!(
                record.evictable,
                "remove of non-evictable frame {}",
                frame_id
            );
            inner.records.remove(&frame_id);
            inner.curr_size -= 1;
        }
    }

    /// Number of evictable tracked frames
    pub fn size(&self) -> usize {
        self.inner.lock().curr_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_evicts_fifo_by_first_access() {
        let replacer = LruKReplacer::new(8, 2);

        replacer.record_access(0); // A
        replacer.record_access(1); // B
        replacer.record_access(2); // C
        for f in 0..3 {
            replacer.set_evictable(f, true);
        }
        assert_eq!(replacer.size(), 3);

        // All three have a single access: oldest first access goes first.
        assert_eq!(replacer.evict(), Some(0));

        // A comes back with a fresh access; B is now the oldest in history.
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_cached_frame_outlives_history_frames() {
        let replacer = LruKReplacer::new(8, 2);

        replacer.record_access(0); // A: t1
        replacer.record_access(1); // B: t2
        replacer.record_access(2); // C: t3
        replacer.record_access(0); // A again: cache set, 2 accesses
        for f in 0..3 {
            replacer.set_evictable(f, true);
        }

        // History (B, C) drains before the cached frame A.
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(2));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_cache_evicts_by_kth_recent_access() {
        let replacer = LruKReplacer::new(8, 2);

        // Two accesses each: frame 0 at t=1,3 and frame 1 at t=2,4.
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Frame 0's 2nd-most-recent access (t=1) is older than frame 1's (t=2).
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_history_drains_before_cache() {
        let replacer = LruKReplacer::new(8, 2);

        replacer.record_access(0);
        replacer.record_access(0); // in cache, very old
        replacer.record_access(1); // single access: infinite distance
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_non_evictable_frames_are_skipped() {
        let replacer = LruKReplacer::new(8, 2);

        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);
        replacer.set_evictable(0, false);

        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_set_evictable_is_idempotent_on_count() {
        let replacer = LruKReplacer::new(4, 2);

        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.size(), 1);
        replacer.set_evictable(0, false);
        replacer.set_evictable(0, false);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_untracked_is_noop() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.remove(3);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_remove_evictable_frame() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.record_access(2);
        replacer.set_evictable(1, true);
        replacer.set_evictable(2, true);

        replacer.remove(1);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(2));
    }

    #[test]
    #[should_panic]
    fn test_remove_non_evictable_panics() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(1);
        replacer.remove(1);
    }

    #[test]
    fn test_reaccess_after_evict_starts_fresh() {
        let replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));

        // Tracking starts over: one access puts the frame back in history.
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }
}
