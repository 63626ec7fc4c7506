use std::collections::BTreeMap;
use tracing::trace;
use crate::segment::Segment;

/// Segments that were sent but not yet acknowledged, keyed by sequence number. The capacity is
///  the sliding window size in segments.
pub struct SendWindow {
    capacity: usize,
    segments: BTreeMap<u32, Segment>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> SendWindow {
        assert!(capacity > 0);
        SendWindow {
            capacity,
            segments: BTreeMap::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.segments.len() >= self.capacity
    }

    pub fn insert(&mut self, segment: Segment) {
        assert!(!self.is_full(), "send window overflow");
        self.segments.insert(segment.sequence_number, segment);
    }

    /// Removes every segment starting below a cumulative ACK, returning the number of segments
    ///  that were removed
    pub fn evict_below(&mut self, acknowledgment_number: u32) -> usize {
        let retained = self.segments.split_off(&acknowledgment_number);
        let evicted = std::mem::replace(&mut self.segments, retained).len();
        if evicted > 0 {
            trace!("ACK #{} evicted {} segments from the send window", acknowledgment_number, evicted);
        }
        evicted
    }

    pub fn clear(&mut self) -> usize {
        let num_cleared = self.segments.len();
        self.segments.clear();
        num_cleared
    }

    pub fn first_sequence_number(&self) -> Option<u32> {
        self.segments.keys().next().copied()
    }

    pub fn segments_mut(&mut self) -> impl Iterator<Item = &mut Segment> {
        self.segments.values_mut()
    }

    pub fn sequence_numbers(&self) -> Vec<u32> {
        self.segments.keys().copied().collect()
    }
}
