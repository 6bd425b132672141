//! Per-tier buffer pool: a byte budget plus an eviction queue.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::buffer::eviction::{EvictionItem, EvictionQueue};
use crate::buffer::frame::Tier;

/// Memory accounting and eviction candidates of one memory tier.
///
/// The pool does not own memory. Slots come from the volatile region, the
/// pool only decides whether the tier may hold another page.
pub struct BufferPool {
    tier: Tier,

    /// Budget in bytes. Zero disables the tier.
    max_bytes: usize,

    used_bytes: AtomicUsize,

    eviction_queue: EvictionQueue,
}

impl BufferPool {
    pub fn new(tier: Tier, max_bytes: usize) -> Self {
        Self {
            tier,
            max_bytes,
            used_bytes: AtomicUsize::new(0),
            eviction_queue: EvictionQueue::new(),
        }
    }

    #[inline]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[inline]
    pub fn used_bytes(&self) -> usize {
        self.used_bytes.load(Ordering::Relaxed)
    }

    /// Whether a page of `bytes` could ever fit into this tier.
    #[inline]
    pub fn can_hold(&self, bytes: usize) -> bool {
        bytes <= self.max_bytes
    }

    /// Claim `bytes` of the budget if they are available.
    pub fn try_reserve(&self, bytes: usize) -> bool {
        self.used_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.max_bytes)
            })
            .is_ok()
    }

    /// Claim `bytes` even if that exceeds the budget.
    pub fn force_reserve(&self, bytes: usize) {
        self.used_bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Return `bytes` to the budget.
    pub fn release(&self, bytes: usize) {
        let old = self.used_bytes.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(old >= bytes, "{} tier released more than it reserved", self.tier);
    }

    #[inline]
    pub fn enqueue(&self, item: EvictionItem) {
        self.eviction_queue.push(item);
    }

    #[inline]
    pub fn eviction_queue(&self) -> &EvictionQueue {
        &self.eviction_queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, PageSizeType};

    #[test]
    fn test_reserve_within_budget() {
        let pool = BufferPool::new(Tier::Dram, 3 * 4096);
        assert!(pool.try_reserve(4096));
        assert!(pool.try_reserve(8192));
        assert!(!pool.try_reserve(1));
        assert_eq!(pool.used_bytes(), 3 * 4096);

        pool.release(4096);
        assert!(pool.try_reserve(4096));
    }

    #[test]
    fn test_force_reserve_overshoots() {
        let pool = BufferPool::new(Tier::Secondary, 4096);
        assert!(pool.try_reserve(4096));
        pool.force_reserve(4096);
        assert_eq!(pool.used_bytes(), 2 * 4096);
        assert!(!pool.try_reserve(1));

        pool.release(4096);
        assert_eq!(pool.used_bytes(), 4096);
    }

    #[test]
    fn test_disabled_tier() {
        let pool = BufferPool::new(Tier::Secondary, 0);
        assert!(!pool.can_hold(4096));
        assert!(!pool.try_reserve(4096));
    }

    #[test]
    fn test_enqueue() {
        let pool = BufferPool::new(Tier::Dram, 4096);
        pool.enqueue(EvictionItem {
            page_id: PageId::new(PageSizeType::KiB4, 0),
            timestamp: 1,
        });
        assert_eq!(pool.eviction_queue().len(), 1);
    }
}
