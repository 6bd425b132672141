//! Page identifier and page size classes.
//!
//! A [`PageId`] packs a validity bit, a [`PageSizeType`] and a slot index into
//! a single `u64`:
//!
//! ```text
//! 63                                   6 5          1 0
//! ┌─────────────────────────────────────┬────────────┬───┐
//! │ index (58 bits)                     │ size type  │ v │
//! └─────────────────────────────────────┴────────────┴───┘
//! ```

use std::fmt;

use crate::common::config::OS_PAGE_SIZE;

/// The discrete set of supported page sizes, from one OS page up to 2 MiB.
///
/// Each variant doubles the size of the previous one, so the byte size of a
/// size type is `OS_PAGE_SIZE << discriminant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum PageSizeType {
    KiB4 = 0,
    KiB8 = 1,
    KiB16 = 2,
    KiB32 = 3,
    KiB64 = 4,
    KiB128 = 5,
    KiB256 = 6,
    KiB512 = 7,
    MiB1 = 8,
    MiB2 = 9,
}

/// Number of page size types.
pub const NUM_PAGE_SIZE_TYPES: usize = PageSizeType::ALL.len();

/// Width of the size type field: `ceil(log2(NUM_PAGE_SIZE_TYPES)) + 1`.
pub const PAGE_SIZE_TYPE_BITS: u32 = (usize::BITS - (NUM_PAGE_SIZE_TYPES - 1).leading_zeros()) + 1;

/// Width of the index field.
pub const PAGE_INDEX_BITS: u32 = u64::BITS - PAGE_SIZE_TYPE_BITS - 1;

/// Largest index a [`PageId`] can carry.
pub const MAX_PAGE_INDEX: u64 = (1u64 << PAGE_INDEX_BITS) - 1;

const VALID_BIT: u64 = 1;
const SIZE_TYPE_SHIFT: u32 = 1;
const SIZE_TYPE_MASK: u64 = (1u64 << PAGE_SIZE_TYPE_BITS) - 1;
const INDEX_SHIFT: u32 = PAGE_SIZE_TYPE_BITS + 1;

impl PageSizeType {
    /// All size types in ascending order.
    pub const ALL: [PageSizeType; 10] = [
        PageSizeType::KiB4,
        PageSizeType::KiB8,
        PageSizeType::KiB16,
        PageSizeType::KiB32,
        PageSizeType::KiB64,
        PageSizeType::KiB128,
        PageSizeType::KiB256,
        PageSizeType::KiB512,
        PageSizeType::MiB1,
        PageSizeType::MiB2,
    ];

    /// Smallest size type.
    pub const MIN: PageSizeType = PageSizeType::KiB4;

    /// Largest size type.
    pub const MAX: PageSizeType = PageSizeType::MiB2;

    /// Number of bytes of a page of this size type.
    #[inline]
    pub const fn bytes(self) -> usize {
        OS_PAGE_SIZE << (self as usize)
    }

    /// Position of this size type in [`PageSizeType::ALL`].
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Look up a size type by its position, or `None` if out of range.
    #[inline]
    pub fn from_index(index: usize) -> Option<PageSizeType> {
        Self::ALL.get(index).copied()
    }

    /// Find the smallest size type whose pages can hold `bytes`.
    ///
    /// Returns `None` if `bytes` exceeds the largest page size.
    ///
    /// # Example
    /// ```
    /// use tierpool::PageSizeType;
    ///
    /// assert_eq!(PageSizeType::fitting(5000), Some(PageSizeType::KiB8));
    /// assert_eq!(PageSizeType::fitting(4096), Some(PageSizeType::KiB4));
    /// assert_eq!(PageSizeType::fitting(3 << 20), None);
    /// ```
    pub fn fitting(bytes: usize) -> Option<PageSizeType> {
        Self::ALL.iter().copied().find(|size_type| bytes <= size_type.bytes())
    }
}

impl fmt::Display for PageSizeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.bytes();
        if bytes >= 1 << 20 {
            write!(f, "{}MiB", bytes >> 20)
        } else {
            write!(f, "{}KiB", bytes >> 10)
        }
    }
}

/// Identifies a page across all size classes.
///
/// The ordering is a total order over the encoded bits. It is useful for
/// ordered containers and debug output but carries no further meaning.
///
/// # Example
/// ```
/// use tierpool::{PageId, PageSizeType};
///
/// let page_id = PageId::new(PageSizeType::KiB8, 42);
/// assert!(page_id.is_valid());
/// assert_eq!(page_id.size_type(), PageSizeType::KiB8);
/// assert_eq!(page_id.index(), 42);
/// assert_eq!(page_id.num_bytes(), 8192);
/// assert_ne!(page_id, PageId::INVALID);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(u64);

impl PageId {
    /// Invalid/sentinel page ID: smallest size type, index 0, not valid.
    pub const INVALID: PageId = PageId(0);

    /// Create a valid page ID.
    ///
    /// # Panics
    /// Panics if `index` does not fit into the index field.
    #[inline]
    pub fn new(size_type: PageSizeType, index: u64) -> Self {
        Self::with_validity(size_type, index, true)
    }

    /// Create a page ID with an explicit validity bit.
    pub fn with_validity(size_type: PageSizeType, index: u64, valid: bool) -> Self {
        assert!(index <= MAX_PAGE_INDEX, "page index {} exceeds {}", index, MAX_PAGE_INDEX);
        let bits = (index << INDEX_SHIFT)
            | ((size_type as u64) << SIZE_TYPE_SHIFT)
            | if valid { VALID_BIT } else { 0 };
        PageId(bits)
    }

    /// Reinterpret encoded bits as a page ID.
    ///
    /// Returns `None` if the size type field is out of range.
    pub fn from_bits(bits: u64) -> Option<Self> {
        let size_type = ((bits >> SIZE_TYPE_SHIFT) & SIZE_TYPE_MASK) as usize;
        PageSizeType::from_index(size_type).map(|_| PageId(bits))
    }

    /// The encoded representation.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// Check if this page ID is valid (not the sentinel value).
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    #[inline]
    pub fn size_type(self) -> PageSizeType {
        let index = ((self.0 >> SIZE_TYPE_SHIFT) & SIZE_TYPE_MASK) as usize;
        // from_bits and with_validity never produce an out-of-range size type
        PageSizeType::ALL[index]
    }

    #[inline]
    pub const fn index(self) -> u64 {
        self.0 >> INDEX_SHIFT
    }

    /// Number of bytes of this page.
    #[inline]
    pub fn num_bytes(self) -> usize {
        self.size_type().bytes()
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Page({}:{})", self.size_type(), self.index())
        } else {
            write!(f, "Page(INVALID)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_field_widths() {
        assert_eq!(NUM_PAGE_SIZE_TYPES, 10);
        assert_eq!(PAGE_SIZE_TYPE_BITS, 5);
        assert_eq!(PAGE_INDEX_BITS, 58);
    }

    #[test]
    fn test_size_type_bytes() {
        assert_eq!(PageSizeType::KiB4.bytes(), 4096);
        assert_eq!(PageSizeType::KiB16.bytes(), 16 * 1024);
        assert_eq!(PageSizeType::MiB2.bytes(), 2 * 1024 * 1024);
        for pair in PageSizeType::ALL.windows(2) {
            assert_eq!(pair[0].bytes() * 2, pair[1].bytes());
        }
    }

    #[test]
    fn test_fitting() {
        assert_eq!(PageSizeType::fitting(0), Some(PageSizeType::KiB4));
        assert_eq!(PageSizeType::fitting(4097), Some(PageSizeType::KiB8));
        assert_eq!(PageSizeType::fitting(5000), Some(PageSizeType::KiB8));
        assert_eq!(PageSizeType::fitting(2 << 20), Some(PageSizeType::MiB2));
        assert_eq!(PageSizeType::fitting((2 << 20) + 1), None);
    }

    #[test]
    fn test_page_id_invalid() {
        assert!(!PageId::INVALID.is_valid());
        assert_eq!(PageId::INVALID.size_type(), PageSizeType::MIN);
        assert_eq!(PageId::INVALID.index(), 0);
        assert_ne!(PageId::new(PageSizeType::KiB4, 0), PageId::INVALID);
        assert_eq!(PageId::default(), PageId::INVALID);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(format!("{}", PageId::new(PageSizeType::KiB8, 42)), "Page(8KiB:42)");
        assert_eq!(format!("{}", PageId::new(PageSizeType::MiB1, 3)), "Page(1MiB:3)");
        assert_eq!(format!("{}", PageId::INVALID), "Page(INVALID)");
    }

    #[test]
    fn test_from_bits_rejects_unknown_size_type() {
        let bits = (31u64 << SIZE_TYPE_SHIFT) | VALID_BIT;
        assert!(PageId::from_bits(bits).is_none());
    }

    #[test]
    #[should_panic(expected = "exceeds")]
    fn test_index_overflow() {
        PageId::new(PageSizeType::KiB4, MAX_PAGE_INDEX + 1);
    }

    proptest! {
        #[test]
        fn prop_encode_decode_roundtrip(
            size in 0usize..NUM_PAGE_SIZE_TYPES,
            index in 0u64..=MAX_PAGE_INDEX,
            valid in any::<bool>(),
        ) {
            let size_type = PageSizeType::from_index(size).unwrap();
            let page_id = PageId::with_validity(size_type, index, valid);
            let decoded = PageId::from_bits(page_id.to_bits()).unwrap();

            prop_assert_eq!(decoded, page_id);
            prop_assert_eq!(decoded.size_type(), size_type);
            prop_assert_eq!(decoded.index(), index);
            prop_assert_eq!(decoded.is_valid(), valid);
        }
    }
}
