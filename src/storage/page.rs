//! AlignedPage - a heap page buffer usable with direct I/O.
//!
//! Buffer frames live inside the volatile regions and never need this type.
//! It is the staging buffer for code that talks to the [`BlockRegion`]
//! directly, e.g. tools and benchmarks.
//!
//! [`BlockRegion`]: crate::storage::BlockRegion

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::common::config::OS_PAGE_SIZE;
use crate::common::PageSizeType;

/// A zero-initialized, OS-page-aligned buffer of one page.
///
/// # Clone Implementation
/// `AlignedPage` does NOT implement `Clone` in production code: copying up
/// to 2 MiB should be explicit. A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use tierpool::storage::AlignedPage;
/// use tierpool::PageSizeType;
///
/// let mut page = AlignedPage::new(PageSizeType::KiB8);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.len(), 8192);
/// ```
pub struct AlignedPage {
    data: NonNull<u8>,
    size_type: PageSizeType,
}

// The buffer is uniquely owned, so it can move between threads.
unsafe impl Send for AlignedPage {}
unsafe impl Sync for AlignedPage {}

impl AlignedPage {
    /// Allocate a new zeroed page of the given size type.
    pub fn new(size_type: PageSizeType) -> Self {
        let layout = Self::layout(size_type);
        // SAFETY: the layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let data = NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout));
        Self { data, size_type }
    }

    fn layout(size_type: PageSizeType) -> Layout {
        // Sizes are powers of two no smaller than the alignment.
        Layout::from_size_align(size_type.bytes(), OS_PAGE_SIZE)
            .unwrap_or_else(|_| unreachable!("page layouts are always valid"))
    }

    #[inline]
    pub fn size_type(&self) -> PageSizeType {
        self.size_type
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size_type.bytes()
    }

    /// Always false; a page holds at least one OS page.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` points to `len()` initialized bytes owned by self.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr(), self.len()) }
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_ptr(), self.len()) }
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.as_mut_slice().fill(0);
    }
}

impl Drop for AlignedPage {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { alloc::dealloc(self.data.as_ptr(), Self::layout(self.size_type)) }
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for AlignedPage {
    fn clone(&self) -> Self {
        let mut page = AlignedPage::new(self.size_type);
        page.as_mut_slice().copy_from_slice(self.as_slice());
        page
    }
}
