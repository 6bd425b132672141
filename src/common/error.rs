//! Error types for tierpool.
//!
//! Only failures a caller can meaningfully observe travel through [`Error`]:
//! I/O failures and resource exhaustion. Broken preconditions (misaligned
//! buffers, double frees, unpinning an unpinned page) are programming errors
//! and panic with a descriptive message instead.

use thiserror::Error;

use crate::buffer::Tier;
use crate::common::page_id::{PageId, PageSizeType};

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All recoverable errors in tierpool.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the backing store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing store transferred less than a full page.
    #[error("short {op} of {page_id}: transferred {transferred} of {expected} bytes")]
    ShortTransfer {
        op: &'static str,
        page_id: PageId,
        transferred: usize,
        expected: usize,
    },

    /// The page lies beyond the extent its size class owns on the device.
    #[error("backing device is full: {page_id} needs {end} bytes but its extent holds {extent}")]
    DeviceFull { page_id: PageId, end: u64, extent: u64 },

    /// No evictable page could make room in a memory tier.
    ///
    /// This happens when every resident page of the tier is pinned.
    #[error("out of memory in {tier} tier: cannot make room for {bytes} bytes")]
    OutOfMemory { tier: Tier, bytes: usize },

    /// The volatile region of a size class has no free slot left.
    #[error("volatile region for {size_type} pages has no free slot")]
    RegionExhausted { size_type: PageSizeType },

    /// The allocation is larger than the largest page size.
    #[error("cannot fit {bytes} bytes into any page size")]
    AllocationTooLarge { bytes: usize },

    /// The configuration cannot back a buffer manager.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
