//! Eviction candidates and the per-tier eviction queue.
//!
//! A queued [`EvictionItem`] is only a hint. The frame may have been pinned,
//! re-marked or evicted since it was pushed, so every pop re-validates the
//! item against the frame's current state word before acting on it.

use crossbeam_queue::SegQueue;

use crate::buffer::frame::{self, FrameState};
use crate::common::PageId;

/// A candidate for eviction, stamped with the frame version at push time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionItem {
    pub page_id: PageId,
    pub timestamp: u64,
}

impl EvictionItem {
    /// Create a candidate for the frame whose current state word is `word`.
    #[inline]
    pub fn new(page_id: PageId, word: u64) -> Self {
        Self {
            page_id,
            timestamp: frame::version(word),
        }
    }

    /// First chance: the frame is still unlocked at the stamped version.
    #[inline]
    pub fn can_mark(&self, word: u64) -> bool {
        FrameState::of(word) == FrameState::Unlocked && frame::version(word) == self.timestamp
    }

    /// Second chance: the frame is still marked at the stamped version.
    #[inline]
    pub fn can_evict(&self, word: u64) -> bool {
        FrameState::of(word) == FrameState::Marked && frame::version(word) == self.timestamp
    }
}

/// Lock-free, approximately FIFO queue of eviction candidates.
#[derive(Default)]
pub struct EvictionQueue {
    queue: SegQueue<EvictionItem>,
}

impl EvictionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&self, item: EvictionItem) {
        self.queue.push(item);
    }

    #[inline]
    pub fn pop(&self) -> Option<EvictionItem> {
        self.queue.pop()
    }

    /// Number of queued items, stale ones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Drop stale items from the front of the queue.
    ///
    /// Inspects at most `max_items` items. Items for which `is_live` holds are
    /// pushed back, so their relative order is kept. Returns the number of
    /// dropped items.
    pub fn purge<F>(&self, max_items: usize, is_live: F) -> usize
    where
        F: Fn(&EvictionItem) -> bool,
    {
        let budget = max_items.min(self.queue.len());
        let mut purged = 0;

        for _ in 0..budget {
            let Some(item) = self.queue.pop() else {
                break;
            };
            if is_live(&item) {
                self.queue.push(item);
            } else {
                purged += 1;
            }
        }

        purged
    }
}
