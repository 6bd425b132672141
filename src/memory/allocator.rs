//! Typed allocation on top of a page-granular memory resource.

use std::marker::PhantomData;
use std::mem;

use crate::buffer::BufferManager;
use crate::common::{Error, Result};
use crate::memory::TaggedPointer;

/// A source of buffer-managed memory.
///
/// Implementors hand out tagged pointers instead of addresses, so the memory
/// behind them may be evicted and faulted back in between accesses.
pub trait MemoryResource {
    /// Allocate `bytes` aligned to `align`.
    fn allocate(&self, bytes: usize, align: usize) -> Result<TaggedPointer<u8>>;

    /// Release memory from [`allocate`](MemoryResource::allocate) with the
    /// same `bytes` and `align`.
    fn deallocate(&self, ptr: TaggedPointer<u8>, bytes: usize, align: usize);
}

impl MemoryResource for BufferManager {
    #[inline]
    fn allocate(&self, bytes: usize, align: usize) -> Result<TaggedPointer<u8>> {
        BufferManager::allocate(self, bytes, align)
    }

    #[inline]
    fn deallocate(&self, ptr: TaggedPointer<u8>, bytes: usize, align: usize) {
        BufferManager::deallocate(self, ptr, bytes, align)
    }
}

/// Allocates arrays of `T` from a [`MemoryResource`].
///
/// Container code holds one of these per element type. It is cheap to copy
/// and only borrows the resource.
///
/// # Example
/// ```no_run
/// use tierpool::{BufferManager, Config, RegionAllocator};
///
/// let bm = BufferManager::new(Config::from_env()?)?;
/// let alloc = RegionAllocator::<u64, _>::new(&bm);
///
/// let ptr = alloc.allocate(100)?;
/// unsafe { ptr.get(&bm).write(42) };
/// alloc.deallocate(ptr, 100);
/// # Ok::<(), tierpool::Error>(())
/// ```
pub struct RegionAllocator<'r, T, R: MemoryResource + ?Sized = BufferManager> {
    resource: &'r R,
    _marker: PhantomData<fn() -> T>,
}

impl<'r, T, R: MemoryResource + ?Sized> RegionAllocator<'r, T, R> {
    pub fn new(resource: &'r R) -> Self {
        Self {
            resource,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn resource(&self) -> &'r R {
        self.resource
    }

    /// Allocate room for `n` values of `T`.
    ///
    /// # Errors
    /// - `Error::AllocationTooLarge` if `n` elements overflow or exceed the
    ///   largest page size
    /// - any error of the underlying resource
    pub fn allocate(&self, n: usize) -> Result<TaggedPointer<T>> {
        let bytes = Self::array_bytes(n)?;
        let ptr = self.resource.allocate(bytes, mem::align_of::<T>())?;
        Ok(ptr.cast())
    }

    /// Release `n` values allocated by [`allocate`](RegionAllocator::allocate).
    pub fn deallocate(&self, ptr: TaggedPointer<T>, n: usize) {
        let bytes = n.saturating_mul(mem::size_of::<T>());
        self.resource
            .deallocate(ptr.cast(), bytes, mem::align_of::<T>());
    }

    /// Allocate raw bytes through the same resource.
    pub fn allocate_bytes(&self, bytes: usize, align: usize) -> Result<TaggedPointer<u8>> {
        self.resource.allocate(bytes, align)
    }

    fn array_bytes(n: usize) -> Result<usize> {
        n.checked_mul(mem::size_of::<T>())
            .ok_or(Error::AllocationTooLarge { bytes: usize::MAX })
    }

    /// Rebind to another element type over the same resource.
    pub fn rebind<U>(&self) -> RegionAllocator<'r, U, R> {
        RegionAllocator::new(self.resource)
    }
}

impl<T, R: MemoryResource + ?Sized> Clone for RegionAllocator<'_, T, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, R: MemoryResource + ?Sized> Copy for RegionAllocator<'_, T, R> {}

impl<T, R: MemoryResource + ?Sized> PartialEq for RegionAllocator<'_, T, R> {
    /// Allocators are interchangeable when they share a resource.
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(self.resource, other.resource)
    }
}
