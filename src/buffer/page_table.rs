//! Page table - maps page IDs to resident frames.
//!
//! The table is split into shards, each a `RwLock<HashMap>`, so lookups on
//! the hot path only contend with writers of the same shard. No shard lock is
//! ever held during I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::buffer::frame::Frame;
use crate::common::PageId;

const NUM_SHARDS: usize = 64;
const SHARD_BITS: u32 = NUM_SHARDS.trailing_zeros();

type Shard = RwLock<HashMap<PageId, Arc<Frame>>>;

/// Concurrent map from [`PageId`] to its resident [`Frame`].
pub struct PageTable {
    shards: Box<[Shard]>,
}

impl PageTable {
    pub fn new() -> Self {
        let shards = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { shards }
    }

    #[inline]
    fn shard(&self, page_id: PageId) -> &Shard {
        // Fibonacci hashing spreads consecutive indices across shards.
        let hash = page_id.to_bits().wrapping_mul(0x9E37_79B9_7F4A_7C15);
        &self.shards[(hash >> (u64::BITS - SHARD_BITS)) as usize]
    }

    /// Look up the frame of a page.
    #[inline]
    pub fn get(&self, page_id: PageId) -> Option<Arc<Frame>> {
        self.shard(page_id).read().get(&page_id).cloned()
    }

    /// Return the frame of a page, installing the one built by `make` if the
    /// page has none. The flag tells whether `make`'s frame was installed.
    ///
    /// This is the single point where concurrent misses on the same page
    /// converge: exactly one caller gets `true`.
    pub fn get_or_insert_with<F>(&self, page_id: PageId, make: F) -> (Arc<Frame>, bool)
    where
        F: FnOnce() -> Frame,
    {
        let mut shard = self.shard(page_id).write();
        if let Some(frame) = shard.get(&page_id) {
            return (Arc::clone(frame), false);
        }
        let frame = Arc::new(make());
        shard.insert(page_id, Arc::clone(&frame));
        (frame, true)
    }

    /// Install a frame unless its page already has one.
    pub fn insert_if_absent(&self, frame: Arc<Frame>) -> bool {
        let mut shard = self.shard(frame.page_id()).write();
        if shard.contains_key(&frame.page_id()) {
            return false;
        }
        shard.insert(frame.page_id(), frame);
        true
    }

    /// Retire an exclusively locked frame and remove it from the table.
    ///
    /// Both happen under the shard lock, so a concurrent lookup either finds
    /// the locked frame (and waits) or finds nothing (and faults the page in
    /// again). Another frame installed for the same page is left alone.
    pub fn remove_evicted(&self, frame: &Arc<Frame>) {
        let page_id = frame.page_id();
        let mut shard = self.shard(page_id).write();
        frame.mark_evicted();
        if shard
            .get(&page_id)
            .is_some_and(|current| Arc::ptr_eq(current, frame))
        {
            shard.remove(&page_id);
        }
    }

    /// Number of resident pages.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Copy out all resident frames. Shards are visited one at a time.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        let mut frames = Vec::new();
        for shard in self.shards.iter() {
            frames.extend(shard.read().values().cloned());
        }
        frames
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::frame::{FrameState, Tier};
    use crate::common::PageSizeType;
    use std::thread;

    fn page(index: u64) -> PageId {
        PageId::new(PageSizeType::KiB4, index)
    }

    #[test]
    fn test_insert_and_get() {
        let table = PageTable::new();
        assert!(table.get(page(1)).is_none());

        let (frame, inserted) = table.get_or_insert_with(page(1), || Frame::new_locked(page(1), Tier::Dram));
        assert!(inserted);
        assert!(Arc::ptr_eq(&table.get(page(1)).unwrap(), &frame));

        let (again, inserted) = table.get_or_insert_with(page(1), || unreachable!());
        assert!(!inserted);
        assert!(Arc::ptr_eq(&again, &frame));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_insert_if_absent() {
        let table = PageTable::new();
        assert!(table.insert_if_absent(Arc::new(Frame::new_locked(page(2), Tier::Dram))));
        assert!(!table.insert_if_absent(Arc::new(Frame::new_locked(page(2), Tier::Dram))));
        assert!(table.get(page(2)).is_some());
    }

    #[test]
    fn test_remove_evicted() {
        let table = PageTable::new();
        let (frame, _) = table.get_or_insert_with(page(3), || Frame::new_locked(page(3), Tier::Dram));

        table.remove_evicted(&frame);
        assert_eq!(frame.state(), FrameState::Evicted);
        assert!(table.get(page(3)).is_none());
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_remove_evicted_keeps_replacement() {
        let table = PageTable::new();
        let old = Arc::new(Frame::new_locked(page(4), Tier::Dram));
        let (current, _) = table.get_or_insert_with(page(4), || Frame::new_locked(page(4), Tier::Dram));

        table.remove_evicted(&old);
        assert!(Arc::ptr_eq(&table.get(page(4)).unwrap(), &current));
    }

    #[test]
    fn test_concurrent_misses_converge() {
        let table = Arc::new(PageTable::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                let (_, inserted) =
                    table.get_or_insert_with(page(7), || Frame::new_locked(page(7), Tier::Dram));
                inserted
            }));
        }

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&inserted| inserted)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_snapshot() {
        let table = PageTable::new();
        for i in 0..100 {
            table.get_or_insert_with(page(i), || Frame::new_locked(page(i), Tier::Dram));
        }
        assert_eq!(table.snapshot().len(), 100);
        assert_eq!(table.len(), 100);
    }
}
