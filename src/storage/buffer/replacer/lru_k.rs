use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::common::types::FrameId;

/// Per-frame access bookkeeping: the last `k` access timestamps plus the
/// evictable flag.
struct LruKNode {
    history: VecDeque<u64>,
    evictable: bool,
}

impl LruKNode {
    fn new(timestamp: u64) -> Self {
        let mut history = VecDeque::new();
        history.push_back(timestamp);
        Self {
            history,
            evictable: false,
        }
    }

    fn record(&mut self, timestamp: u64, k: usize) {
        self.history.push_back(timestamp);
        if self.history.len() > k {
            self.history.pop_front();
        }
    }

    fn earliest(&self) -> u64 {
        *self.history.front().expect("history holds at least one access")
    }
}

/// Eviction-order key for one frame. Ordered so that the first element of
/// the set is the next victim:
/// - frames with fewer than k accesses come before mature frames;
/// - among young frames, the one with the oldest first access comes first;
/// - among mature frames, the one whose k-th most recent access is furthest
///   in the past comes first.
/// The history is bounded to the last k accesses, so its front is the first
/// access for a young frame and the k-th most recent for a mature one.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct EvictOrder {
    mature: bool,
    backward_ts: u64,
    frame_id: FrameId,
}

/// LRU-K replacement policy over a fixed universe of frames.
///
/// Victim selection maximizes backward k-distance: the frame whose k-th most
/// recent access is oldest is evicted first, and frames with fewer than k
/// recorded accesses (infinite distance) rank ahead of all mature frames,
/// ordered among themselves by their first access (classical LRU).
pub struct LruKReplacer {
    k: usize,
    current_timestamp: u64,
    node_store: HashMap<FrameId, LruKNode>,
    evictable_frames: BTreeSet<EvictOrder>,
}

impl LruKReplacer {
    pub fn new(num_frames: usize, k: usize) -> Self {
        assert!(k > 1, "LRU-K requires k > 1");
        Self {
            k,
            current_timestamp: 0,
            node_store: HashMap::with_capacity(num_frames),
            evictable_frames: BTreeSet::new(),
        }
    }

    /// Record an access to the frame at the current logical tick.
    pub fn record_access(&mut self, frame_id: FrameId) {
        let timestamp = self.current_timestamp;
        self.current_timestamp += 1;

        match self.node_store.get_mut(&frame_id) {
            Some(node) => {
                if node.evictable {
                    let old_key = Self::key_of(frame_id, node, self.k);
                    self.evictable_frames.remove(&old_key);
                }
                node.record(timestamp, self.k);
                if node.evictable {
                    let new_key = Self::key_of(frame_id, node, self.k);
                    self.evictable_frames.insert(new_key);
                }
            }
            None => {
                self.node_store.insert(frame_id, LruKNode::new(timestamp));
            }
        }
    }

    fn key_of(frame_id: FrameId, node: &LruKNode, k: usize) -> EvictOrder {
        EvictOrder {
            mature: node.history.len() >= k,
            backward_ts: node.earliest(),
            frame_id,
        }
    }

    /// Toggle whether the frame may be chosen as a victim.
    pub fn set_evictable(&mut self, frame_id: FrameId, evictable: bool) {
        if let Some(node) = self.node_store.get_mut(&frame_id) {
            if node.evictable == evictable {
                return;
            }
            let key = Self::key_of(frame_id, node, self.k);
            if evictable {
                self.evictable_frames.insert(key);
            } else {
                self.evictable_frames.remove(&key);
            }
            node.evictable = evictable;
        }
    }

    /// Drop all bookkeeping for the frame. The frame must be evictable.
    pub fn remove(&mut self, frame_id: FrameId) {
        if let Some(node) = self.node_store.get(&frame_id) {
            assert!(node.evictable, "cannot remove a non-evictable frame");
            let key = Self::key_of(frame_id, node, self.k);
            self.evictable_frames.remove(&key);
            self.node_store.remove(&frame_id);
        }
    }

    /// Evict the frame with the largest backward k-distance, if any frame is
    /// evictable.
    pub fn evict(&mut self) -> Option<FrameId> {
        let key = self.evictable_frames.pop_first()?;
        self.node_store.remove(&key.frame_id);
        Some(key.frame_id)
    }

    /// Number of evictable frames.
    pub fn size(&self) -> usize {
        self.evictable_frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evict_none_when_empty() {
        let mut replacer = LruKReplacer::new(4, 2);
        assert_eq!(replacer.evict(), None);
        assert_eq!(replacer.size(), 0);
    }

    #[test]
    fn test_young_frames_evicted_before_mature() {
        let mut replacer = LruKReplacer::new(4, 2);
        // Frame 0 accessed twice (mature), frame 1 once (young)
        replacer.record_access(0);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), None);
    }

    #[test]
    fn test_mature_frames_order_by_kth_recent_access() {
        let mut replacer = LruKReplacer::new(4, 2);
        // history: frame 0 -> [0, 3], frame 1 -> [1, 2]
        replacer.record_access(0); // t=0
        replacer.record_access(1); // t=1
        replacer.record_access(1); // t=2
        replacer.record_access(0); // t=3
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Frame 0's 2nd most recent access (t=0) is older than frame 1's (t=1)
        assert_eq!(replacer.evict(), Some(0));
        assert_eq!(replacer.evict(), Some(1));
    }

    #[test]
    fn test_non_evictable_frames_are_skipped() {
        let mut replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0);
        replacer.record_access(1);
        replacer.set_evictable(0, false);
        replacer.set_evictable(1, true);
        assert_eq!(replacer.size(), 1);
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), None);

        replacer.set_evictable(0, true);
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_record_access_reorders_evictable_frame() {
        let mut replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0); // t=0
        replacer.record_access(0); // t=1
        replacer.record_access(1); // t=2
        replacer.record_access(1); // t=3
        replacer.set_evictable(0, true);
        replacer.set_evictable(1, true);

        // Frame 0 would be the victim, but a fresh access pushes its k-th
        // most recent timestamp past frame 1's.
        replacer.record_access(0); // history [1, 4]
        assert_eq!(replacer.evict(), Some(1));
        assert_eq!(replacer.evict(), Some(0));
    }

    #[test]
    fn test_eviction_order_mixed_sequence() {
        // Access sequence over seven frames with k = 2; all frames then
        // become evictable. Frame 7 has a single access (infinite distance),
        // then mature frames by oldest k-th most recent access.
        let mut replacer = LruKReplacer::new(8, 2);
        for frame in [1, 2, 3, 4, 1, 2, 5, 6, 1, 2, 3, 4, 5, 6, 7] {
            replacer.record_access(frame);
        }
        for frame in 1..=7 {
            replacer.set_evictable(frame, true);
        }
        assert_eq!(replacer.size(), 7);

        let mut order = Vec::new();
        while let Some(frame) = replacer.evict() {
            order.push(frame);
        }
        assert_eq!(order, vec![7, 3, 4, 1, 2, 5, 6]);
    }

    #[test]
    #[should_panic(expected = "non-evictable")]
    fn test_remove_pinned_frame_panics() {
        let mut replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0);
        replacer.remove(0);
    }

    #[test]
    fn test_remove_clears_state() {
        let mut replacer = LruKReplacer::new(4, 2);
        replacer.record_access(0);
        replacer.set_evictable(0, true);
        replacer.remove(0);
        assert_eq!(replacer.size(), 0);
        assert_eq!(replacer.evict(), None);
    }
}
