//! Buffer-managed memory for containers.
//!
//! - [`TaggedPointer`] - A page ID plus offset, resolved on every access
//! - [`MemoryResource`] / [`RegionAllocator`] - Typed allocation on top of
//!   the buffer manager

mod allocator;
mod tagged_ptr;

pub use allocator::{MemoryResource, RegionAllocator};
pub use tagged_ptr::TaggedPointer;
