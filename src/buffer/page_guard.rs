//! RAII guards for page access.
//!
//! These guards pin a page for as long as they live:
//! - [`PageReadGuard`] - Shared pin, many at a time
//! - [`PageWriteGuard`] - Exclusive pin, unpins the page dirty
//!
//! Both guards unpin the page when dropped, which makes it an eviction
//! candidate again once the last pin is gone.

use std::ops::{Deref, DerefMut};

use crate::common::PageId;

use super::buffer_manager::BufferManager;

/// Guard for read-only page access.
///
/// # Example
/// ```ignore
/// let guard = bm.fetch_page_read(page_id)?;
/// let first = guard[0];  // Deref to &[u8]
/// // guard drops here, page unpinned
/// ```
pub struct PageReadGuard<'a> {
    bm: &'a BufferManager,
    page_id: PageId,
    data: &'a [u8],
}

impl<'a> PageReadGuard<'a> {
    /// Called by `BufferManager::fetch_page_read()` with the pin already held.
    pub(crate) fn new(bm: &'a BufferManager, page_id: PageId, data: &'a [u8]) -> Self {
        Self { bm, page_id, data }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageReadGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl Drop for PageReadGuard<'_> {
    fn drop(&mut self) {
        self.bm.unpin_page(self.page_id, false);
    }
}

/// Guard for exclusive write access to a page.
///
/// The page is marked dirty when the guard is dropped, whether or not it was
/// written to.
pub struct PageWriteGuard<'a> {
    bm: &'a BufferManager,
    page_id: PageId,
    data: &'a mut [u8],
}

impl<'a> PageWriteGuard<'a> {
    /// Called by `BufferManager::fetch_page_write()` with the pin already held.
    pub(crate) fn new(bm: &'a BufferManager, page_id: PageId, data: &'a mut [u8]) -> Self {
        Self { bm, page_id, data }
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for PageWriteGuard<'_> {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for PageWriteGuard<'_> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl Drop for PageWriteGuard<'_> {
    fn drop(&mut self) {
        self.bm.unpin_page(self.page_id, true);
    }
}
