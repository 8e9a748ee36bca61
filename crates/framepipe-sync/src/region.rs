use core::mem::{align_of, size_of};
use core::ptr::NonNull;

/// An unowned view of a contiguous block of memory, addressed by offset.
///
/// A `Region` is how code in this workspace talks about a mapped segment:
/// every structure inside the segment is reached as `base + offset`, so two
/// processes that map the same segment at different addresses agree on the
/// layout. The view does not keep the mapping alive; whoever hands out a
/// `Region` must outlive every use of it.
#[derive(Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: a Region is a plain address range; synchronization of the bytes it
// covers is the job of the atomics stored inside it.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a view over `len` bytes starting at `base`.
    ///
    /// # Safety
    ///
    /// - `base` must be non-null, 64-byte aligned and valid for reads and
    ///   writes of `len` bytes.
    /// - The memory must stay mapped for as long as any copy of this view is used.
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        let base = NonNull::new(base).expect("region base must be non-null");
        assert!(
            (base.as_ptr() as usize).is_multiple_of(64),
            "region base must be 64-byte aligned"
        );
        Self { base, len }
    }

    /// Length of the region in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address of the region in this process.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Address of `offset` within the region.
    #[inline]
    pub fn offset(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "offset {offset} out of bounds ({})", self.len);
        // SAFETY: offset is within the mapped range.
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Shared reference to a `T` stored at `offset`.
    ///
    /// # Safety
    ///
    /// The bytes at `offset` must hold a valid `T`. Concurrent mutation from
    /// other processes is only sound through interior mutability (atomics).
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        self.check::<T>(offset);
        unsafe { &*(self.offset(offset) as *const T) }
    }

    /// Exclusive reference to a `T` stored at `offset`.
    ///
    /// # Safety
    ///
    /// Same as [`Region::get`], and no other reference to these bytes may be
    /// live, in this process or any other. Only used while initializing a
    /// segment nobody else has attached to yet.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, offset: usize) -> &mut T {
        self.check::<T>(offset);
        unsafe { &mut *(self.offset(offset) as *mut T) }
    }

    /// Byte slice covering `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// Nobody may write to these bytes while the slice is alive.
    #[inline]
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        unsafe { core::slice::from_raw_parts(self.offset(offset), len) }
    }

    /// Mutable byte slice covering `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive write access to these bytes for the
    /// lifetime of the slice.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        self.check_range(offset, len);
        unsafe { core::slice::from_raw_parts_mut(self.offset(offset), len) }
    }

    #[inline]
    fn check<T>(&self, offset: usize) {
        self.check_range(offset, size_of::<T>());
        assert!(
            (self.base.as_ptr() as usize + offset).is_multiple_of(align_of::<T>()),
            "misaligned access at offset {offset}"
        );
    }

    #[inline]
    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len).expect("region range overflow");
        assert!(end <= self.len, "range {offset}..{end} out of bounds ({})", self.len);
    }
}

/// Heap-backed region for tests and single-process use.
#[cfg(any(test, feature = "alloc"))]
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: alloc::alloc::Layout,
}

#[cfg(any(test, feature = "alloc"))]
unsafe impl Send for HeapRegion {}
#[cfg(any(test, feature = "alloc"))]
unsafe impl Sync for HeapRegion {}

#[cfg(any(test, feature = "alloc"))]
impl HeapRegion {
    /// Allocate `len` zeroed bytes, 64-byte aligned.
    pub fn new_zeroed(len: usize) -> Self {
        let layout = alloc::alloc::Layout::from_size_align(len.max(64), 64)
            .expect("heap region layout");
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc::alloc_zeroed(layout) };
        let ptr = match NonNull::new(raw) {
            Some(ptr) => ptr,
            None => alloc::alloc::handle_alloc_error(layout),
        };
        Self { ptr, layout }
    }

    /// View over the allocation.
    pub fn region(&self) -> Region {
        // SAFETY: the allocation is valid, aligned, and lives as long as self.
        unsafe { Region::from_raw(self.ptr.as_ptr(), self.layout.size()) }
    }
}

#[cfg(any(test, feature = "alloc"))]
impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: ptr was allocated with this layout.
        unsafe { alloc::alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
}
