//! Exit Priority Queue
//!
//! Binary min-heap over 256-bit priority keys. One queue exists per asset.
//!
//! A key packs `(exitable_at << 128) | utxo_pos`, so plain integer order is
//! chronological first and positional second. The queue only ever removes
//! its minimum; cancelled exits stay queued until their turn.

use std::fmt;

use alloy_primitives::U256;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::clock::Timestamp;
use crate::core::utxo::UtxoPos;

/// Maximum number of entries a single queue holds.
pub const MAX_QUEUE_SIZE: usize = (1 << 30) - 1;

/// Queue errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// Queue already holds `MAX_QUEUE_SIZE` entries.
    #[error("priority queue is full ({MAX_QUEUE_SIZE} entries)")]
    Full,
}

/// Packed `(exitable_at, utxo_pos)` priority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityKey(pub U256);

impl PriorityKey {
    /// Pack an exit's eligibility time and position.
    pub fn new(exitable_at: Timestamp, utxo_pos: UtxoPos) -> Self {
        Self(U256::from_limbs([utxo_pos.as_u64(), 0, exitable_at, 0]))
    }

    /// Time after which the exit may be paid.
    #[inline]
    pub fn exitable_at(&self) -> Timestamp {
        self.0.as_limbs()[2]
    }

    /// Position of the exiting output.
    #[inline]
    pub fn utxo_pos(&self) -> UtxoPos {
        UtxoPos(self.0.as_limbs()[0])
    }
}

impl fmt::Display for PriorityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.utxo_pos(), self.exitable_at())
    }
}

/// Array-backed binary min-heap.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PriorityQueue {
    heap: Vec<PriorityKey>,
}

impl PriorityQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// True when nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Smallest key, without removing it.
    #[inline]
    pub fn get_min(&self) -> Option<PriorityKey> {
        self.heap.first().copied()
    }

    /// Add a key and restore heap order.
    pub fn insert(&mut self, key: PriorityKey) -> Result<(), QueueError> {
        if self.heap.len() >= MAX_QUEUE_SIZE {
            return Err(QueueError::Full);
        }
        self.heap.push(key);
        self.sift_up(self.heap.len() - 1);
        Ok(())
    }

    /// Remove and return the smallest key.
    pub fn del_min(&mut self) -> Option<PriorityKey> {
        if self.heap.is_empty() {
            return None;
        }
        let min = self.heap.swap_remove(0);
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(min)
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.heap[index] >= self.heap[parent] {
                break;
            }
            self.heap.swap(index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * index + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let smallest = if right < len && self.heap[right] < self.heap[left] {
                right
            } else {
                left
            };
            if self.heap[index] <= self.heap[smallest] {
                break;
            }
            self.heap.swap(index, smallest);
            index = smallest;
        }
    }
}
