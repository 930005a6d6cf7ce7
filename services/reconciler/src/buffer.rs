//! Bounded delta buffer
//!
//! Holds deltas that arrive while no snapshot is present. Capacity is a
//! hard cap: on overflow the oldest delta is evicted to make room, so the
//! buffer always holds the most recent window of the feed.

use std::collections::VecDeque;

use tracing::debug;

use crate::delta::Delta;

#[derive(Debug, Clone)]
pub struct DeltaBuffer {
    deltas: VecDeque<Delta>,
    capacity: usize,
    /// Total deltas evicted since creation.
    evictions: u64,
}

impl DeltaBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            deltas: VecDeque::new(),
            capacity,
            evictions: 0,
        }
    }

    /// Queue a delta. Returns the delta that had to be dropped, if any.
    ///
    /// With zero capacity the incoming delta itself is returned.
    pub fn push(&mut self, delta: Delta) -> Option<Delta> {
        if self.capacity == 0 {
            self.evictions += 1;
            return Some(delta);
        }

        let evicted = if self.deltas.len() >= self.capacity {
            self.evictions += 1;
            self.deltas.pop_front()
        } else {
            None
        };

        if let Some(ref old) = evicted {
            debug!(
                evicted_sequence = ?old.sequence_id,
                capacity = self.capacity,
                "Delta buffer full, evicted oldest"
            );
        }

        self.deltas.push_back(delta);
        evicted
    }

    /// Take every buffered delta in arrival order.
    pub fn drain(&mut self) -> Vec<Delta> {
        self.deltas.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delta> {
        self.deltas.iter()
    }
}
