//! Volatile Region - reserved virtual memory for page slots.
//!
//! One large mapping is reserved up front and sliced into one region per size
//! class, in ascending size order:
//!
//! ```text
//! base
//!  │
//!  ▼
//! ┌──────────────┬──────────────┬──────────────┬─────┬──────────────┐
//! │  4 KiB slots │  8 KiB slots │ 16 KiB slots │ ... │  2 MiB slots │
//! └──────────────┴──────────────┴──────────────┴─────┴──────────────┘
//!  ◀─ region ──▶
//! ```
//!
//! The address of a slot is `base + class × region_bytes + index × page_bytes`,
//! so an address maps back to its page without any lookup. On unix the
//! mapping is `MAP_NORESERVE`: physical memory is committed on first touch and
//! handed back with `madvise(MADV_DONTNEED)` when a page is evicted.

use std::io;
use std::ptr::NonNull;

use parking_lot::Mutex;

use crate::common::{Error, PageId, PageSizeType, Result, NUM_PAGE_SIZE_TYPES};

/// A reserved, zero-initialized range of virtual memory.
struct MappedRegion {
    ptr: NonNull<u8>,
    len: usize,
}

#[cfg(unix)]
impl MappedRegion {
    fn reserve(len: usize) -> io::Result<Self> {
        #[cfg(target_os = "linux")]
        const NORESERVE: libc::c_int = libc::MAP_NORESERVE;
        #[cfg(not(target_os = "linux"))]
        const NORESERVE: libc::c_int = 0;

        // SAFETY: anonymous mapping at a kernel-chosen address.
        let raw = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | NORESERVE,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(raw as *mut u8).ok_or_else(|| io::Error::other("mmap returned null"))?;
        Ok(Self { ptr, len })
    }

    /// Hand the physical memory of a range back to the kernel. The range reads
    /// as zeroes afterwards.
    fn discard(&self, data: *mut u8, len: usize) -> io::Result<()> {
        // SAFETY: callers pass a page-aligned range inside the mapping.
        let ret = unsafe { libc::madvise(data as *mut libc::c_void, len, libc::MADV_DONTNEED) };
        if ret != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: unmapping the range returned by mmap.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(not(unix))]
impl MappedRegion {
    const ALIGN: usize = 4096;

    fn reserve(len: usize) -> io::Result<Self> {
        use std::alloc::{alloc_zeroed, Layout};

        let layout = Layout::from_size_align(len, Self::ALIGN)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(|| io::Error::from(io::ErrorKind::OutOfMemory))?;
        Ok(Self { ptr, len })
    }

    fn discard(&self, data: *mut u8, len: usize) -> io::Result<()> {
        // SAFETY: callers pass a range inside the allocation.
        unsafe { std::ptr::write_bytes(data, 0, len) };
        Ok(())
    }
}

#[cfg(not(unix))]
impl Drop for MappedRegion {
    fn drop(&mut self) {
        use std::alloc::{dealloc, Layout};

        // SAFETY: same layout as in reserve.
        unsafe {
            dealloc(
                self.ptr.as_ptr(),
                Layout::from_size_align_unchecked(self.len, Self::ALIGN),
            );
        }
    }
}

/// Free-slot bookkeeping of one size class.
struct SlotAllocator {
    capacity: u64,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    /// First index never handed out.
    next: u64,
    /// Released indices, reused LIFO.
    free: Vec<u64>,
}

/// Per-size-class arenas of page slots inside one reserved mapping.
pub struct VolatileRegion {
    mapping: MappedRegion,

    /// Start of the first region, aligned to the largest page size.
    base: *mut u8,

    region_bytes: usize,

    slots: Vec<SlotAllocator>,
}

// SAFETY: the raw pointers refer to the owned mapping. Slot bookkeeping is
// behind mutexes; the slot memory itself is synchronized by frame pins.
unsafe impl Send for VolatileRegion {}
unsafe impl Sync for VolatileRegion {}

impl VolatileRegion {
    /// Reserve `region_bytes` of address space for every size class.
    ///
    /// # Errors
    /// - `Error::InvalidConfig` if `region_bytes` is not a positive multiple
    ///   of the largest page size
    /// - I/O errors if the address space cannot be reserved
    pub fn reserve(region_bytes: usize) -> Result<Self> {
        let max_page = PageSizeType::MAX.bytes();
        if region_bytes == 0 || region_bytes % max_page != 0 {
            return Err(Error::InvalidConfig(format!(
                "volatile region of {} bytes is not a positive multiple of {}",
                region_bytes,
                PageSizeType::MAX
            )));
        }

        let total = region_bytes
            .checked_mul(NUM_PAGE_SIZE_TYPES)
            .and_then(|bytes| bytes.checked_add(max_page))
            .ok_or_else(|| Error::InvalidConfig(format!("volatile region of {} bytes overflows", region_bytes)))?;

        let mapping = MappedRegion::reserve(total)?;
        let misalignment = mapping.ptr.as_ptr() as usize % max_page;
        let skip = if misalignment == 0 { 0 } else { max_page - misalignment };
        // SAFETY: the mapping holds one extra max_page bytes for this shift.
        let base = unsafe { mapping.ptr.as_ptr().add(skip) };

        let slots = PageSizeType::ALL
            .iter()
            .map(|size_type| SlotAllocator {
                capacity: (region_bytes / size_type.bytes()) as u64,
                state: Mutex::new(SlotState::default()),
            })
            .collect();

        Ok(Self {
            mapping,
            base,
            region_bytes,
            slots,
        })
    }

    /// Bytes reserved per size class.
    #[inline]
    pub fn region_bytes(&self) -> usize {
        self.region_bytes
    }

    /// Number of slots of a size class.
    #[inline]
    pub fn capacity(&self, size_type: PageSizeType) -> u64 {
        self.slots[size_type.index()].capacity
    }

    /// Hand out a free slot index.
    ///
    /// # Errors
    /// `Error::RegionExhausted` if every slot of the class is in use.
    pub fn allocate_slot(&self, size_type: PageSizeType) -> Result<u64> {
        let slots = &self.slots[size_type.index()];
        let mut state = slots.state.lock();

        if let Some(index) = state.free.pop() {
            return Ok(index);
        }
        if state.next < slots.capacity {
            let index = state.next;
            state.next += 1;
            return Ok(index);
        }
        Err(Error::RegionExhausted { size_type })
    }

    /// Return a slot index for reuse. The slot memory is not touched.
    pub fn release_slot(&self, page_id: PageId) {
        let slots = &self.slots[page_id.size_type().index()];
        debug_assert!(page_id.index() < slots.capacity);
        slots.state.lock().free.push(page_id.index());
    }

    /// Address of the slot backing a page.
    ///
    /// # Panics
    /// Panics if the page index lies outside its size class region.
    #[inline]
    pub fn slot_ptr(&self, page_id: PageId) -> *mut u8 {
        let size_type = page_id.size_type();
        assert!(
            page_id.index() < self.capacity(size_type),
            "{} lies outside the volatile region",
            page_id
        );
        let offset = size_type.index() * self.region_bytes + page_id.index() as usize * size_type.bytes();
        // SAFETY: offset is within the reserved mapping.
        unsafe { self.base.add(offset) }
    }

    /// Whether an address lies inside any size class region.
    #[inline]
    pub fn contains(&self, ptr: *const u8) -> bool {
        let addr = ptr as usize;
        let base = self.base as usize;
        addr >= base && addr < base + self.region_bytes * NUM_PAGE_SIZE_TYPES
    }

    /// Map an address back to its page, size class and offset within the page.
    pub fn unswizzle(&self, ptr: *const u8) -> Option<(PageId, PageSizeType, usize)> {
        if !self.contains(ptr) {
            return None;
        }
        let offset = ptr as usize - self.base as usize;
        let size_type = PageSizeType::from_index(offset / self.region_bytes)?;
        let within = offset % self.region_bytes;
        let index = (within / size_type.bytes()) as u64;
        Some((PageId::new(size_type, index), size_type, within % size_type.bytes()))
    }

    /// Release the physical memory of a page's slot.
    pub fn free(&self, page_id: PageId) -> io::Result<()> {
        self.mapping.discard(self.slot_ptr(page_id), page_id.num_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGION: usize = 4 << 20;

    #[test]
    fn test_reserve_rejects_bad_sizes() {
        assert!(matches!(VolatileRegion::reserve(0), Err(Error::InvalidConfig(_))));
        assert!(matches!(VolatileRegion::reserve(4096), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_capacity_per_class() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        assert_eq!(region.capacity(PageSizeType::KiB4), 1024);
        assert_eq!(region.capacity(PageSizeType::MiB2), 2);
    }

    #[test]
    fn test_slot_addresses_are_aligned_and_disjoint() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        for size_type in PageSizeType::ALL {
            let first = region.slot_ptr(PageId::new(size_type, 0));
            let second = region.slot_ptr(PageId::new(size_type, 1));
            assert_eq!(first as usize % size_type.bytes(), 0);
            assert_eq!(second as usize - first as usize, size_type.bytes());
        }
    }

    #[test]
    fn test_allocate_and_release_slots() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        assert_eq!(region.allocate_slot(PageSizeType::MiB2).unwrap(), 0);
        assert_eq!(region.allocate_slot(PageSizeType::MiB2).unwrap(), 1);
        assert!(matches!(
            region.allocate_slot(PageSizeType::MiB2),
            Err(Error::RegionExhausted {
                size_type: PageSizeType::MiB2
            })
        ));

        region.release_slot(PageId::new(PageSizeType::MiB2, 0));
        assert_eq!(region.allocate_slot(PageSizeType::MiB2).unwrap(), 0);
    }

    #[test]
    fn test_unswizzle_roundtrip() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        let page_id = PageId::new(PageSizeType::KiB8, 5);
        let ptr = region.slot_ptr(page_id);

        let inner = unsafe { ptr.add(100) };
        assert_eq!(region.unswizzle(inner), Some((page_id, PageSizeType::KiB8, 100)));
        assert_eq!(region.unswizzle(std::ptr::null()), None);
    }

    #[test]
    fn test_free_zeroes_slot() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        let page_id = PageId::new(PageSizeType::KiB4, 3);
        let ptr = region.slot_ptr(page_id);

        unsafe {
            *ptr = 0x5A;
            assert_eq!(*ptr, 0x5A);
        }
        region.free(page_id).unwrap();
        assert_eq!(unsafe { *ptr }, 0);
    }

    #[test]
    #[should_panic(expected = "outside the volatile region")]
    fn test_slot_ptr_out_of_range() {
        let region = VolatileRegion::reserve(REGION).unwrap();
        region.slot_ptr(PageId::new(PageSizeType::MiB2, 2));
    }
}
