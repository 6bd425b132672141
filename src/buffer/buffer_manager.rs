//! Buffer Manager - the tiered page caching layer.
//!
//! The [`BufferManager`] provides:
//! - Page resolution across DRAM, a secondary memory tier and a block device
//! - Pin-based reference counting on lock-free frame state words
//! - Second-chance eviction driven by per-tier eviction queues
//! - Migration between tiers according to a [`MigrationPolicy`](crate::buffer::MigrationPolicy)
//! - Allocation of page-backed memory returned as [`TaggedPointer`]s

use std::mem;
use std::ptr;
use std::slice;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::buffer::eviction::EvictionItem;
use crate::buffer::frame::{AccessIntent, Frame, FrameState, Tier};
use crate::buffer::numa::{self, NumaPlacement};
use crate::buffer::page_table::PageTable;
use crate::buffer::pool::BufferPool;
use crate::buffer::purge_worker::PurgeWorker;
use crate::buffer::volatile_region::VolatileRegion;
use crate::buffer::{Metrics, PageReadGuard, PageWriteGuard};
use crate::common::backoff::yield_backoff;
use crate::common::config::{IDLE_EVICTION_QUEUE_PURGE, MAX_EVICTION_QUEUE_PURGES, MAX_EVICTION_WAITS};
use crate::common::{Config, Error, PageId, PageSizeType, Result};
use crate::memory::TaggedPointer;
use crate::storage::BlockRegion;

/// Manages resident pages across two memory tiers and a block device.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────────────────┐
/// │                          BufferManager                           │
/// │  ┌──────────────┐      ┌──────────────────────────────────────┐  │
/// │  │  page_table  │      │           volatile_region            │  │
/// │  │PageId → Frame│─────▶│  [4KiB slots][8KiB slots] ... [2MiB] │  │
/// │  └──────────────┘      └──────────────────────────────────────┘  │
/// │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────────┐  │
/// │  │  dram pool   │  │secondary pool│  │      block_region      │  │
/// │  │budget + queue│─▶│budget + queue│─▶│ pages on file / device │  │
/// │  └──────────────┘  └──────────────┘  └────────────────────────┘  │
/// └──────────────────────────────────────────────────────────────────┘
/// ```
///
/// Every page ID owns a fixed slot in the volatile region. Moving a page
/// between DRAM and the secondary tier rebinds the slot's physical memory to
/// another NUMA node; the address never changes. Evicting a page to the
/// block device hands the slot's physical memory back to the kernel.
///
/// # Thread Safety
/// - `page_table`: sharded `RwLock`s, never held during I/O
/// - frames: a single atomic state word per page, all transitions are CAS
/// - pools: atomic budgets and lock-free eviction queues
/// - `volatile_region`: a `Mutex` per size class for the free-slot list
/// - `block_region`: positional I/O, no lock
///
/// # Usage
/// ```no_run
/// use tierpool::{AccessIntent, BufferManager, Config};
///
/// let bm = BufferManager::new(Config::from_env()?)?;
///
/// let ptr = bm.allocate(5000, 8)?;
/// unsafe { ptr.get(&bm).write(0xAB) };
/// bm.unpin_page(ptr.page_id(), true);
///
/// bm.pin_page(ptr.page_id(), AccessIntent::Read)?;
/// assert_eq!(unsafe { *ptr.get(&bm) }, 0xAB);
/// bm.unpin_page(ptr.page_id(), false);
/// # Ok::<(), tierpool::Error>(())
/// ```
pub struct BufferManager {
    inner: Arc<Inner>,

    /// Background purge of stale eviction candidates, if enabled.
    purge_worker: Option<PurgeWorker>,
}

struct Inner {
    config: Config,
    page_table: PageTable,
    volatile_region: VolatileRegion,
    block_region: BlockRegion,
    dram: BufferPool,
    secondary: BufferPool,
    placement: Box<dyn NumaPlacement>,
    metrics: Metrics,
}

impl BufferManager {
    /// Create a buffer manager, choosing NUMA placement from the config.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if the config does not validate
    /// - I/O errors while reserving memory or opening the backing store
    pub fn new(config: Config) -> Result<Self> {
        let placement = numa::placement_for(config.numa_node);
        Self::with_placement(config, placement)
    }

    /// Create a buffer manager with an explicit NUMA placement policy.
    pub fn with_placement(config: Config, placement: Box<dyn NumaPlacement>) -> Result<Self> {
        config.validate()?;

        let volatile_region = VolatileRegion::reserve(config.reserved_bytes_per_region())?;
        let block_region = BlockRegion::open(&config.ssd_path, config.direct_io)?;

        let dram_bytes = if config.migration_policy.uses_dram() {
            config.dram_buffer_pool_size
        } else {
            0
        };
        let secondary_bytes = config.effective_secondary_size();

        info!(
            dram_bytes,
            secondary_bytes,
            policy = %config.migration_policy,
            numa_node = ?config.numa_node,
            placement = placement.name(),
            layout = ?block_region.layout(),
            direct_io = block_region.is_direct(),
            "buffer manager ready"
        );

        let enable_purge_worker = config.enable_eviction_purge_worker;
        let inner = Arc::new(Inner {
            config,
            page_table: PageTable::new(),
            volatile_region,
            block_region,
            dram: BufferPool::new(Tier::Dram, dram_bytes),
            secondary: BufferPool::new(Tier::Secondary, secondary_bytes),
            placement,
            metrics: Metrics::new(),
        });

        let purge_worker = if enable_purge_worker {
            let weak = Arc::downgrade(&inner);
            Some(PurgeWorker::spawn(
                "tierpool-purge",
                IDLE_EVICTION_QUEUE_PURGE,
                move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.purge_eviction_queues();
                    }
                },
            )?)
        } else {
            None
        };

        Ok(Self {
            inner,
            purge_worker,
        })
    }

    // ========================================================================
    // Public API: Allocation
    // ========================================================================

    /// Allocate `bytes` with the given alignment on a fresh page.
    ///
    /// The page is the smallest size class that holds `bytes` rounded up to
    /// `align`. It is returned pinned once (the allocation pin) and dirty;
    /// [`BufferManager::deallocate`] releases that pin. Content is not zeroed.
    ///
    /// # Panics
    /// Panics if `align` is not a power of two.
    ///
    /// # Errors
    /// - `Error::AllocationTooLarge` if no page size fits
    /// - `Error::RegionExhausted` if the size class has no free slot
    /// - `Error::OutOfMemory` if the tier budget cannot be freed up
    pub fn allocate(&self, bytes: usize, align: usize) -> Result<TaggedPointer<u8>> {
        assert!(align.is_power_of_two(), "alignment {} is not a power of two", align);
        let inner = &*self.inner;

        let rounded = bytes
            .checked_add(align - 1)
            .map(|padded| padded & !(align - 1))
            .ok_or(Error::AllocationTooLarge { bytes })?;
        let size_type = PageSizeType::fitting(rounded).ok_or(Error::AllocationTooLarge { bytes })?;
        let page_bytes = size_type.bytes();
        let tier = inner.config.migration_policy.fault_in_tier();

        let frame = loop {
            let index = inner.volatile_region.allocate_slot(size_type)?;
            let frame = Arc::new(Frame::new_locked(PageId::new(size_type, index), tier));
            if inner.page_table.insert_if_absent(Arc::clone(&frame)) {
                break frame;
            }
            // The slot backs a page that was pinned by ID; leave it alone.
        };
        let page_id = frame.page_id();

        if let Err(e) = inner.reserve(tier, page_bytes) {
            inner.page_table.remove_evicted(&frame);
            inner.volatile_region.release_slot(page_id);
            return Err(e);
        }

        let data = inner.volatile_region.slot_ptr(page_id);
        frame.set_data(data);
        frame.set_dirty();
        if tier == Tier::Secondary {
            inner.place(data, page_bytes, inner.config.numa_node);
        }
        frame.downgrade_to_shared();

        Metrics::bump(&inner.metrics.num_allocs);
        Metrics::add(&inner.metrics.total_allocated_bytes, bytes);
        Metrics::add(&inner.metrics.total_unused_bytes, page_bytes - bytes.min(page_bytes));
        trace!(page = %page_id, bytes, "allocated");

        Ok(TaggedPointer::new(page_id, 0))
    }

    /// Release an allocation.
    ///
    /// Drops the allocation pin. If no other pin remains, the slot is
    /// reclaimed right away without writing the page anywhere. Otherwise the
    /// last remaining unpin reclaims it. A released page is never written to
    /// the block device.
    ///
    /// # Panics
    /// Panics on a null pointer or a page that is not resident (double free).
    pub fn deallocate(&self, ptr: TaggedPointer<u8>, bytes: usize, align: usize) {
        let inner = &*self.inner;
        let page_id = ptr.page_id();
        assert!(page_id.is_valid(), "deallocating a null pointer");
        debug_assert!(
            bytes.max(align) <= page_id.num_bytes(),
            "{} bytes were never allocated on {}",
            bytes,
            page_id
        );

        let frame = inner
            .page_table
            .get(page_id)
            .unwrap_or_else(|| panic!("double free of {}", page_id));
        Metrics::bump(&inner.metrics.num_deallocs);

        // Set before dropping the pin, so whichever unpin comes last sees it.
        frame.set_freed();
        if let Some(word) = frame.unlock_shared() {
            inner.try_reclaim(&frame, word);
        }
    }

    // ========================================================================
    // Public API: Pinning
    // ========================================================================

    /// Pin a page, faulting it in from the block device if needed.
    ///
    /// `AccessIntent::Read` takes a shared pin, `AccessIntent::Write` an
    /// exclusive one. Concurrent misses on the same page converge on one
    /// reader; the others wait for the page to become resident.
    ///
    /// # Panics
    /// Panics on an invalid page ID, or if the page stays locked implausibly
    /// long.
    ///
    /// # Errors
    /// - `Error::OutOfMemory` if no room can be made in the target tier
    /// - `Error::RegionExhausted` if the index lies outside the volatile region
    /// - I/O errors (including `ShortTransfer`) reading the page
    pub fn pin_page(&self, page_id: PageId, intent: AccessIntent) -> Result<()> {
        assert!(page_id.is_valid(), "cannot pin {}", page_id);
        let inner = &*self.inner;
        let mut repeat = 0;

        loop {
            if let Some(frame) = inner.page_table.get(page_id) {
                let word = frame.load();
                let pinned = match intent {
                    AccessIntent::Read => frame.try_lock_shared(word),
                    AccessIntent::Write => frame.try_lock_exclusive(word),
                };
                if pinned {
                    Metrics::bump(&inner.metrics.total_hits);
                    inner.on_hit(&frame, intent);
                    return Ok(());
                }
                // Locked by a writer or a faulting reader, or evicted and
                // about to leave the table.
                yield_backoff(repeat);
                repeat += 1;
                continue;
            }

            let tier = inner.config.migration_policy.fault_in_tier();
            let (frame, inserted) = inner
                .page_table
                .get_or_insert_with(page_id, || Frame::new_locked(page_id, tier));
            if inserted {
                return inner.fault_in(&frame, intent);
            }
        }
    }

    /// Pin a page for reading and return its address.
    ///
    /// The caller must [`unpin_page`](BufferManager::unpin_page) it when done.
    pub fn get_page(&self, page_id: PageId) -> Result<*mut u8> {
        self.pin_page(page_id, AccessIntent::Read)?;
        Ok(self.inner.volatile_region.slot_ptr(page_id))
    }

    /// Drop a pin taken by [`pin_page`](BufferManager::pin_page), marking the
    /// page dirty if it was modified.
    ///
    /// # Panics
    /// Panics if the page is not resident or not pinned.
    pub fn unpin_page(&self, page_id: PageId, dirty: bool) {
        let frame = self
            .inner
            .page_table
            .get(page_id)
            .unwrap_or_else(|| panic!("unpinning {} which is not resident", page_id));
        if dirty {
            frame.set_dirty();
        }
        self.inner.unpin_frame(&frame);
    }

    /// Number of pins on a resident page, `None` if it is not resident.
    pub fn get_pin_count(&self, page_id: PageId) -> Option<u32> {
        self.inner.page_table.get(page_id).map(|frame| frame.pin_count())
    }

    /// Whether a resident page has unwritten modifications.
    pub fn is_dirty(&self, page_id: PageId) -> bool {
        self.inner
            .page_table
            .get(page_id)
            .is_some_and(|frame| frame.is_dirty())
    }

    // ========================================================================
    // Public API: Addresses
    // ========================================================================

    /// Address of a page's slot. Does not pin.
    ///
    /// The address is only meaningful while the caller holds a pin.
    ///
    /// # Panics
    /// Panics on an invalid page ID or an index outside the volatile region.
    /// Debug builds also panic if the page is not resident.
    pub fn resolve(&self, page_id: PageId) -> *mut u8 {
        assert!(page_id.is_valid(), "cannot resolve {}", page_id);
        debug_assert!(
            self.inner
                .page_table
                .get(page_id)
                .is_some_and(|frame| !frame.is_evicted()),
            "{} is not resident",
            page_id
        );
        self.inner.volatile_region.slot_ptr(page_id)
    }

    /// Map an address back to its page, size class and offset in the page.
    ///
    /// Returns `None` for addresses outside the volatile region.
    pub fn unswizzle(&self, ptr: *const u8) -> Option<(PageId, PageSizeType, usize)> {
        self.inner.volatile_region.unswizzle(ptr)
    }

    // ========================================================================
    // Public API: Guards
    // ========================================================================

    /// Pin a page for reading and return a guard that unpins on drop.
    pub fn fetch_page_read(&self, page_id: PageId) -> Result<PageReadGuard<'_>> {
        self.pin_page(page_id, AccessIntent::Read)?;
        let data = self.inner.volatile_region.slot_ptr(page_id);
        // SAFETY: the shared pin keeps the slot resident and excludes writers.
        let data = unsafe { slice::from_raw_parts(data, page_id.num_bytes()) };
        Ok(PageReadGuard::new(self, page_id, data))
    }

    /// Pin a page exclusively and return a guard that unpins it dirty on drop.
    pub fn fetch_page_write(&self, page_id: PageId) -> Result<PageWriteGuard<'_>> {
        self.pin_page(page_id, AccessIntent::Write)?;
        let data = self.inner.volatile_region.slot_ptr(page_id);
        // SAFETY: the exclusive pin keeps the slot resident and excludes
        // every other pin.
        let data = unsafe { slice::from_raw_parts_mut(data, page_id.num_bytes()) };
        Ok(PageWriteGuard::new(self, page_id, data))
    }

    // ========================================================================
    // Public API: Flush
    // ========================================================================

    /// Write a resident page to the block device if it is dirty.
    ///
    /// Waits while the page is pinned exclusively.
    ///
    /// # Errors
    /// - I/O errors from the device write; the page stays dirty
    pub fn flush_page(&self, page_id: PageId) -> Result<()> {
        match self.inner.page_table.get(page_id) {
            Some(frame) => self.inner.flush_frame(&frame),
            None => Ok(()),
        }
    }

    /// Write all dirty resident pages to the block device and sync it.
    pub fn flush_all_pages(&self) -> Result<()> {
        let frames = self.inner.page_table.snapshot();
        let mut flushed = 0;
        for frame in frames {
            if frame.is_dirty() {
                self.inner.flush_frame(&frame)?;
                flushed += 1;
            }
        }
        self.inner.block_region.sync()?;
        debug!(flushed, "flushed all dirty pages");
        Ok(())
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Number of resident pages in both tiers.
    pub fn resident_pages(&self) -> usize {
        self.inner.page_table.len()
    }

    /// Bytes of bookkeeping memory: frames, page table entries and queued
    /// eviction candidates. Page data is not included.
    pub fn memory_consumption(&self) -> usize {
        let inner = &*self.inner;
        let frames = inner.page_table.len();
        let queued = inner.dram.eviction_queue().len() + inner.secondary.eviction_queue().len();

        mem::size_of::<Inner>()
            + frames * (mem::size_of::<Frame>() + mem::size_of::<(PageId, Arc<Frame>)>())
            + queued * mem::size_of::<EvictionItem>()
    }

    /// Drop stale candidates from both eviction queues. Returns their number.
    pub fn purge_eviction_queues(&self) -> usize {
        self.inner.purge_eviction_queues()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        if let Some(mut worker) = self.purge_worker.take() {
            worker.stop();
        }
    }
}

// ============================================================================
// Internal: residency, eviction and migration
// ============================================================================

impl Inner {
    #[inline]
    fn pool(&self, tier: Tier) -> &BufferPool {
        match tier {
            Tier::Dram => &self.dram,
            Tier::Secondary => &self.secondary,
        }
    }

    fn record_usage(&self) {
        self.metrics
            .record_usage(self.dram.used_bytes(), self.secondary.used_bytes());
    }

    /// Bind page memory to a NUMA node. Failures only cost locality.
    fn place(&self, data: *mut u8, len: usize, node: Option<u32>) {
        if self.config.numa_node.is_none() {
            return;
        }
        Metrics::bump(&self.metrics.num_placement_calls);
        if let Err(e) = self.placement.place(data, len, node) {
            warn!(placement = self.placement.name(), ?node, error = %e, "page placement failed");
        }
    }

    /// Fault a page in. The caller installed `frame` exclusively locked.
    fn fault_in(&self, frame: &Arc<Frame>, intent: AccessIntent) -> Result<()> {
        match self.load_page(frame) {
            Ok(()) => {
                if intent == AccessIntent::Read {
                    frame.downgrade_to_shared();
                }
                Ok(())
            }
            Err(e) => {
                debug!(page = %frame.page_id(), error = %e, "fault-in failed");
                self.page_table.remove_evicted(frame);
                Err(e)
            }
        }
    }

    fn load_page(&self, frame: &Frame) -> Result<()> {
        let page_id = frame.page_id();
        let size_type = page_id.size_type();
        if page_id.index() >= self.volatile_region.capacity(size_type) {
            return Err(Error::RegionExhausted { size_type });
        }

        let tier = frame.tier();
        let bytes = page_id.num_bytes();
        self.reserve(tier, bytes)?;

        let data = self.volatile_region.slot_ptr(page_id);
        // SAFETY: the slot lies inside the mapping, and the exclusive lock on
        // the frame keeps everybody else away from it.
        let buf = unsafe { slice::from_raw_parts_mut(data, bytes) };
        if let Err(e) = self.block_region.read_page(page_id, buf) {
            self.pool(tier).release(bytes);
            self.record_usage();
            return Err(e);
        }

        frame.set_data(data);
        frame.set_durable(true);
        if tier == Tier::Secondary {
            self.place(data, bytes, self.config.numa_node);
        }

        Metrics::bump(&self.metrics.total_misses);
        Metrics::add(&self.metrics.total_bytes_read, bytes);
        trace!(page = %page_id, %tier, "faulted in");
        Ok(())
    }

    /// Promote a freshly pinned secondary-tier page if the policy says so.
    fn on_hit(&self, frame: &Frame, intent: AccessIntent) {
        if frame.tier() != Tier::Secondary {
            return;
        }
        Metrics::bump(&self.metrics.secondary_hits);

        if !self.config.migration_policy.promote_on_access(intent)
            || !frame.try_move_tier(Tier::Secondary, Tier::Dram)
        {
            return;
        }

        let page_id = frame.page_id();
        let bytes = page_id.num_bytes();

        // Hand the secondary budget back first: the DRAM victim this
        // promotion evicts may need exactly that room.
        self.secondary.release(bytes);
        self.record_usage();

        match self.reserve(Tier::Dram, bytes) {
            Ok(()) => {
                self.place(frame.data(), bytes, None);
                Metrics::bump(&self.metrics.num_promotions);
                trace!(page = %page_id, "promoted to DRAM");
            }
            Err(e) => {
                frame.set_tier(Tier::Secondary);
                self.restore_secondary_budget(bytes);
                debug!(page = %page_id, error = %e, "promotion failed, page stays on the secondary tier");
            }
        }
    }

    /// Claim back the secondary budget of a page whose promotion failed.
    ///
    /// Migrations may have used the room in the meantime. If nothing on the
    /// secondary tier can be evicted either, the tier stays over budget until
    /// its next eviction.
    fn restore_secondary_budget(&self, bytes: usize) {
        match self.make_room(&self.secondary, bytes, false) {
            Ok(true) => {}
            Ok(false) => {
                self.secondary.force_reserve(bytes);
                self.record_usage();
                warn!(bytes, used = self.secondary.used_bytes(), "secondary tier over budget");
            }
            Err(e) => {
                self.secondary.force_reserve(bytes);
                self.record_usage();
                warn!(bytes, error = %e, "secondary tier over budget");
            }
        }
    }

    fn unpin_frame(&self, frame: &Arc<Frame>) {
        let tier = frame.tier();
        let word = match frame.state() {
            FrameState::Exclusive => Some(frame.unlock_exclusive()),
            _ => frame.unlock_shared(),
        };
        let Some(word) = word else {
            return;
        };
        if frame.is_freed() && self.try_reclaim(frame, word) {
            return;
        }

        let pool = self.pool(tier);
        pool.enqueue(EvictionItem::new(frame.page_id(), word));
        if pool.eviction_queue().len() > Self::purge_threshold(pool) {
            self.purge_pool(pool);
        }
    }

    /// Queue length beyond which unpinning purges the queue inline.
    ///
    /// At most one queued item per resident page is live, so anything past
    /// the tier's resident page count plus one purge pass is stale.
    #[inline]
    fn purge_threshold(pool: &BufferPool) -> usize {
        pool.used_bytes() / PageSizeType::MIN.bytes() + MAX_EVICTION_QUEUE_PURGES
    }

    /// Reclaim a released page once its last pin is gone. `word` is the state
    /// word left by that unpin. Returns false if the page was pinned again,
    /// in which case the next last unpin retries.
    fn try_reclaim(&self, frame: &Arc<Frame>, word: u64) -> bool {
        if !frame.try_lock_exclusive(word) {
            return false;
        }
        self.reclaim(frame);
        true
    }

    /// Drop an exclusively locked, released page without any I/O and hand
    /// its slot back to the volatile region.
    fn reclaim(&self, frame: &Arc<Frame>) {
        let page_id = frame.page_id();
        let tier = frame.tier();

        frame.clear_dirty();
        frame.set_data(ptr::null_mut());
        self.page_table.remove_evicted(frame);
        self.pool(tier).release(page_id.num_bytes());
        self.record_usage();
        self.volatile_region.release_slot(page_id);
        trace!(page = %page_id, %tier, "deallocated");
    }

    /// Claim `bytes` of a tier's budget, evicting pages until they fit.
    fn reserve(&self, tier: Tier, bytes: usize) -> Result<()> {
        if self.make_room(self.pool(tier), bytes, true)? {
            Ok(())
        } else {
            Err(Error::OutOfMemory { tier, bytes })
        }
    }

    /// Evict from `pool` until `bytes` fit into its budget, then claim them.
    ///
    /// With `wait`, an empty queue is retried for a bounded number of rounds
    /// since concurrent unpins may refill it. Returns false if no room could
    /// be made.
    fn make_room(&self, pool: &BufferPool, bytes: usize, wait: bool) -> Result<bool> {
        if !pool.can_hold(bytes) {
            return Ok(false);
        }

        let mut waits = 0;
        loop {
            if pool.try_reserve(bytes) {
                self.record_usage();
                return Ok(true);
            }

            match pool.eviction_queue().pop() {
                Some(item) => self.process_candidate(pool, item)?,
                None if wait && waits < MAX_EVICTION_WAITS => {
                    yield_backoff(waits);
                    waits += 1;
                }
                None => {
                    if wait {
                        warn!(
                            tier = %pool.tier(),
                            bytes,
                            used = pool.used_bytes(),
                            max = pool.max_bytes(),
                            "no evictable page left"
                        );
                    }
                    return Ok(false);
                }
            }
        }
    }

    /// Act on one popped eviction candidate.
    ///
    /// The first validated pop marks the frame and requeues it; the second
    /// one evicts. Stale candidates are dropped.
    fn process_candidate(&self, pool: &BufferPool, item: EvictionItem) -> Result<()> {
        let frame = match self.page_table.get(item.page_id) {
            Some(frame) if frame.tier() == pool.tier() => frame,
            _ => {
                Metrics::bump(&self.metrics.num_stale_candidates);
                return Ok(());
            }
        };

        let word = frame.load();
        if item.can_mark(word) {
            match frame.try_mark(word) {
                Some(marked) => pool.enqueue(EvictionItem::new(item.page_id, marked)),
                None => Metrics::bump(&self.metrics.num_stale_candidates),
            }
            return Ok(());
        }

        if !item.can_evict(word) || !frame.try_lock_for_eviction(item.timestamp) {
            Metrics::bump(&self.metrics.num_stale_candidates);
            return Ok(());
        }

        let result = self.evict(pool, &frame);
        if result.is_err() {
            let word = frame.unlock_exclusive();
            pool.enqueue(EvictionItem::new(item.page_id, word));
        }
        result
    }

    /// Evict a frame locked for eviction out of `pool`.
    ///
    /// On error the frame is unchanged and still locked.
    fn evict(&self, pool: &BufferPool, frame: &Arc<Frame>) -> Result<()> {
        if frame.is_freed() {
            self.reclaim(frame);
            return Ok(());
        }

        let page_id = frame.page_id();
        let bytes = page_id.num_bytes();

        if pool.tier() == Tier::Dram
            && self
                .config
                .migration_policy
                .prefers_secondary_on_eviction(frame.is_dirty(), frame.is_durable())
            && self.make_room(&self.secondary, bytes, false)?
        {
            self.place(frame.data(), bytes, self.config.numa_node);
            frame.set_tier(Tier::Secondary);
            self.dram.release(bytes);
            self.record_usage();

            let word = frame.unlock_exclusive();
            self.secondary.enqueue(EvictionItem::new(page_id, word));

            Metrics::bump(&self.metrics.num_migrations);
            Metrics::bump(&self.metrics.num_evictions);
            debug!(page = %page_id, "migrated to the secondary tier");
            return Ok(());
        }

        if frame.is_dirty() || !frame.is_durable() {
            self.write_back(frame)?;
        }

        match self.volatile_region.free(page_id) {
            Ok(()) => Metrics::bump(&self.metrics.num_madvise_free_calls),
            Err(e) => warn!(page = %page_id, error = %e, "releasing slot memory failed"),
        }
        frame.set_data(ptr::null_mut());
        self.page_table.remove_evicted(frame);
        pool.release(bytes);
        self.record_usage();

        Metrics::bump(&self.metrics.num_evictions);
        trace!(page = %page_id, tier = %pool.tier(), "evicted to the block device");
        Ok(())
    }

    /// Write a pinned or locked page to the block device.
    fn write_back(&self, frame: &Frame) -> Result<()> {
        let page_id = frame.page_id();
        let data = frame.data();
        debug_assert!(!data.is_null(), "{} has no slot", page_id);

        // Cleared first so a modification during the write is not lost.
        let was_dirty = frame.clear_dirty();
        // SAFETY: the caller's pin or lock keeps the slot resident.
        let buf = unsafe { slice::from_raw_parts(data, page_id.num_bytes()) };
        if let Err(e) = self.block_region.write_page(page_id, buf) {
            if was_dirty {
                frame.set_dirty();
            }
            warn!(page = %page_id, error = %e, "write-back failed");
            return Err(e);
        }

        frame.set_durable(true);
        Metrics::add(&self.metrics.total_bytes_written, page_id.num_bytes());
        Ok(())
    }

    fn flush_frame(&self, frame: &Arc<Frame>) -> Result<()> {
        let mut repeat = 0;
        loop {
            let word = frame.load();
            if FrameState::of(word) == FrameState::Evicted {
                return Ok(());
            }
            if frame.try_lock_shared(word) {
                break;
            }
            yield_backoff(repeat);
            repeat += 1;
        }

        let result = if frame.is_dirty() && !frame.is_freed() {
            self.write_back(frame)
        } else {
            Ok(())
        };
        self.unpin_frame(frame);
        result
    }

    fn purge_eviction_queues(&self) -> usize {
        let purged = self.purge_pool(&self.dram) + self.purge_pool(&self.secondary);
        if purged > 0 {
            debug!(purged, "purged stale eviction candidates");
        }
        purged
    }

    /// One purge pass over a tier's eviction queue.
    fn purge_pool(&self, pool: &BufferPool) -> usize {
        let purged = pool.eviction_queue().purge(MAX_EVICTION_QUEUE_PURGES, |item| {
            self.page_table.get(item.page_id).is_some_and(|frame| {
                let word = frame.load();
                frame.tier() == pool.tier() && (item.can_mark(word) || item.can_evict(word))
            })
        });
        Metrics::add(&self.metrics.num_stale_candidates, purged);
        purged
    }
}
