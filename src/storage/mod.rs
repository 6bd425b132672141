//! Storage layer - the persistent backing store.
//!
//! This module handles persistent storage:
//! - [`BlockRegion`] - Direct page I/O against a file, directory or block device
//! - [`AlignedPage`] - A heap page buffer suitable for direct I/O

mod block_region;
mod page;

pub use block_region::{BackingLayout, BlockRegion};
pub use page::AlignedPage;
