//! tierpool - A tiered buffer manager for DRAM, secondary memory and SSDs.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            tierpool                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Memory Layer (memory/)                      │   │
//! │  │      TaggedPointer<T> + RegionAllocator<T>               │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Buffer Manager (buffer/)                    │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │  Migration: Eager | Lazy | DRAM-only | 2nd-only │   │   │
//! │  │   │     DRAM pool ──evict──▶ secondary pool          │   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  │   PageTable + Frame + VolatileRegion + Metrics          │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │           Storage Layer (storage/)                       │   │
//! │  │     BlockRegion (O_DIRECT) + AlignedPage                 │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, PageSizeType, Error, Config)
//! - [`buffer`] - The buffer manager, frames, eviction and migration
//! - [`storage`] - Page I/O against the block device
//! - [`memory`] - Tagged pointers and typed allocation
//!
//! # Quick Start
//! ```no_run
//! use tierpool::{BufferManager, Config, MigrationPolicy, TaggedPointer};
//!
//! let config = Config::default()
//!     .with_ssd_path("/mnt/nvme/tierpool")
//!     .with_dram_buffer_pool_size(256 << 20)
//!     .with_migration_policy(MigrationPolicy::Eager);
//! let bm = BufferManager::new(config)?;
//!
//! // Allocate 5000 bytes: lands on an 8 KiB page, pinned until deallocated.
//! let ptr: TaggedPointer<u8> = bm.allocate(5000, 8)?;
//! unsafe { ptr.get(&bm).write_bytes(0xAB, 5000) };
//!
//! // Release the allocation pin; the page may now be evicted and reloaded.
//! bm.unpin_page(ptr.page_id(), true);
//!
//! let guard = bm.fetch_page_read(ptr.page_id())?;
//! assert_eq!(guard[4999], 0xAB);
//! # Ok::<(), tierpool::Error>(())
//! ```

// Core modules
pub mod buffer;
pub mod common;
pub mod memory;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{Config, Error, PageId, PageSizeType, Result};

pub use buffer::{
    AccessIntent, BufferManager, Metrics, MetricsSnapshot, MigrationPolicy, PageReadGuard,
    PageWriteGuard, Tier,
};
pub use memory::{MemoryResource, RegionAllocator, TaggedPointer};
pub use storage::{AlignedPage, BlockRegion};
