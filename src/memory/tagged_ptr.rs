//! Tagged pointers - page-relative references into buffer-managed memory.
//!
//! A [`TaggedPointer`] stores a page ID and a byte offset instead of an
//! address. It stays valid across evictions; every access resolves it
//! through the buffer manager.
//!
//! ```text
//! TaggedPointer { page_id: Page(8KiB:3), offset: 24 }
//!         │
//!         ▼  BufferManager::resolve
//! base + class(8KiB) × region + 3 × 8192 + 24
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::ptr;

use crate::buffer::BufferManager;
use crate::common::PageId;

/// A reference to a `T` inside a buffer-managed page.
///
/// Arithmetic moves the offset by whole elements and never changes the page
/// ID. Moving past the end of the page is a caller error, caught by the
/// bounds check in debug builds when the pointer is resolved.
///
/// Resolving does not pin. The caller must hold a pin on the page for as long
/// as it uses the returned address.
pub struct TaggedPointer<T> {
    page_id: PageId,
    /// Byte offset from the start of the page.
    offset: isize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TaggedPointer<T> {
    /// A pointer that resolves to null.
    #[inline]
    pub const fn null() -> Self {
        Self {
            page_id: PageId::INVALID,
            offset: 0,
            _marker: PhantomData,
        }
    }

    /// A pointer `offset` bytes into a page.
    #[inline]
    pub const fn new(page_id: PageId, offset: isize) -> Self {
        Self {
            page_id,
            offset,
            _marker: PhantomData,
        }
    }

    /// Find the pointer for an address inside the volatile region.
    ///
    /// A null address gives a null pointer. Addresses the buffer manager does
    /// not own give `None`.
    pub fn from_raw(bm: &BufferManager, ptr: *const T) -> Option<Self> {
        if ptr.is_null() {
            return Some(Self::null());
        }
        let (page_id, _, offset) = bm.unswizzle(ptr as *const u8)?;
        Some(Self::new(page_id, offset as isize))
    }

    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    /// Offset in bytes from the start of the page.
    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        !self.page_id.is_valid()
    }

    /// Current address of the referenced `T`, or null for a null pointer.
    ///
    /// # Panics
    /// Debug builds panic if the offset points outside the page.
    #[inline]
    pub fn get(&self, bm: &BufferManager) -> *mut T {
        if self.is_null() {
            return ptr::null_mut();
        }
        debug_assert!(
            self.offset >= 0 && self.offset as usize <= self.page_id.num_bytes(),
            "offset {} lies outside {}",
            self.offset,
            self.page_id
        );
        bm.resolve(self.page_id).wrapping_offset(self.offset) as *mut T
    }

    /// Reinterpret as a pointer to `U` at the same byte position.
    #[inline]
    pub fn cast<U>(self) -> TaggedPointer<U> {
        TaggedPointer::new(self.page_id, self.offset)
    }

    /// Advance by one element.
    #[inline]
    pub fn increment(&mut self) -> &mut Self {
        *self += 1;
        self
    }

    /// Step back by one element.
    #[inline]
    pub fn decrement(&mut self) -> &mut Self {
        *self -= 1;
        self
    }

    /// Distance in elements from `origin` to `self`.
    ///
    /// # Panics
    /// Panics if the pointers refer to different pages.
    pub fn offset_from(&self, origin: &TaggedPointer<T>) -> isize {
        assert_eq!(
            self.page_id, origin.page_id,
            "pointers into different pages have no distance"
        );
        let bytes = self.offset - origin.offset;
        match mem::size_of::<T>() {
            0 => bytes,
            size => bytes / size as isize,
        }
    }

    #[inline]
    fn element_bytes(count: isize) -> isize {
        count * mem::size_of::<T>() as isize
    }
}

impl<T> Clone for TaggedPointer<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TaggedPointer<T> {}

impl<T> Default for TaggedPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T> fmt::Debug for TaggedPointer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return write!(f, "TaggedPointer(null)");
        }
        write!(f, "TaggedPointer({}+{})", self.page_id, self.offset)
    }
}

// ============================================================================
// Arithmetic
// ============================================================================

impl<T> Add<isize> for TaggedPointer<T> {
    type Output = Self;

    #[inline]
    fn add(mut self, count: isize) -> Self {
        self += count;
        self
    }
}

impl<T> Sub<isize> for TaggedPointer<T> {
    type Output = Self;

    #[inline]
    fn sub(mut self, count: isize) -> Self {
        self -= count;
        self
    }
}

impl<T> AddAssign<isize> for TaggedPointer<T> {
    #[inline]
    fn add_assign(&mut self, count: isize) {
        self.offset += Self::element_bytes(count);
    }
}

impl<T> SubAssign<isize> for TaggedPointer<T> {
    #[inline]
    fn sub_assign(&mut self, count: isize) {
        self.offset -= Self::element_bytes(count);
    }
}

// ============================================================================
// Comparison
// ============================================================================
//
// Every page ID owns a fixed slot and the slot regions ascend by size class,
// so comparing (size class, index, offset) orders pointers exactly like their
// resolved addresses, without resolving them. Null sorts first.

impl<T> TaggedPointer<T> {
    #[inline]
    fn address_key(&self) -> (bool, usize, u64, isize) {
        if self.is_null() {
            return (false, 0, 0, 0);
        }
        (
            true,
            self.page_id.size_type().index(),
            self.page_id.index(),
            self.offset,
        )
    }
}

impl<T> PartialEq for TaggedPointer<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.address_key() == other.address_key()
    }
}

impl<T> Eq for TaggedPointer<T> {}

impl<T> PartialOrd for TaggedPointer<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for TaggedPointer<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.address_key().cmp(&other.address_key())
    }
}

impl<T> Hash for TaggedPointer<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address_key().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageSizeType;
    use std::collections::HashSet;

    fn page(size_type: PageSizeType, index: u64) -> PageId {
        PageId::new(size_type, index)
    }

    #[test]
    fn test_null_pointer() {
        let ptr = TaggedPointer::<u32>::null();
        assert!(ptr.is_null());
        assert_eq!(ptr, TaggedPointer::default());
        assert_eq!(format!("{:?}", ptr), "TaggedPointer(null)");
    }

    #[test]
    fn test_arithmetic_moves_offset_by_elements() {
        let mut ptr = TaggedPointer::<u64>::new(page(PageSizeType::KiB4, 2), 0);
        ptr += 3;
        assert_eq!(ptr.offset(), 24);
        ptr = ptr - 1;
        assert_eq!(ptr.offset(), 16);
        ptr.increment().increment();
        assert_eq!(ptr.offset(), 32);
        ptr.decrement();
        assert_eq!(ptr.offset(), 24);
        assert_eq!(ptr.page_id(), page(PageSizeType::KiB4, 2));

        let origin = TaggedPointer::<u64>::new(page(PageSizeType::KiB4, 2), 0);
        assert_eq!(ptr.offset_from(&origin), 3);
        assert_eq!((origin + 5).offset_from(&origin), 5);
    }

    #[test]
    fn test_cast_keeps_byte_position() {
        let ptr = TaggedPointer::<u64>::new(page(PageSizeType::KiB8, 1), 8) + 1;
        let bytes: TaggedPointer<u8> = ptr.cast();
        assert_eq!(bytes.offset(), 16);
        assert_eq!((bytes + 1).offset(), 17);
    }

    #[test]
    fn test_ordering_follows_addresses() {
        let null = TaggedPointer::<u8>::null();
        let small = TaggedPointer::<u8>::new(page(PageSizeType::KiB4, 900), 4000);
        let larger_class = TaggedPointer::<u8>::new(page(PageSizeType::KiB8, 0), 0);
        let next_slot = TaggedPointer::<u8>::new(page(PageSizeType::KiB8, 1), 0);

        let mut sorted = vec![next_slot, larger_class, small, null];
        sorted.sort();
        assert_eq!(sorted, vec![null, small, larger_class, next_slot]);
    }

    #[test]
    fn test_hash_distinguishes_offsets() {
        let base = TaggedPointer::<u8>::new(page(PageSizeType::KiB4, 1), 0);
        let set: HashSet<_> = [base, base + 1, base, base + 1].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    #[should_panic(expected = "different pages")]
    fn test_offset_from_across_pages_panics() {
        let a = TaggedPointer::<u8>::new(page(PageSizeType::KiB4, 1), 0);
        let b = TaggedPointer::<u8>::new(page(PageSizeType::KiB4, 2), 0);
        a.offset_from(&b);
    }
}
