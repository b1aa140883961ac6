//! Memory regions an [`AtomicBuffer`](crate::AtomicBuffer) can view.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::ptr::NonNull;
use strata_mmap::{MmapFile, MmapFileMut};

/// A contiguous block of memory that stays at a fixed address while alive.
///
/// # Safety
/// Implementors must return the same pointer and length for their whole
/// lifetime, and the pointer must be valid for `len()` bytes. If
/// `is_writable()` is true the bytes must be writable through the pointer.
pub unsafe trait Region: Send + Sync {
    fn as_ptr(&self) -> *mut u8;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_writable(&self) -> bool {
        true
    }
}

unsafe impl Region for MmapFileMut {
    fn as_ptr(&self) -> *mut u8 {
        self.as_mut_ptr()
    }

    fn len(&self) -> usize {
        MmapFileMut::len(self)
    }
}

unsafe impl Region for MmapFile {
    fn as_ptr(&self) -> *mut u8 {
        MmapFile::as_ptr(self).cast_mut()
    }

    fn len(&self) -> usize {
        MmapFile::len(self)
    }

    fn is_writable(&self) -> bool {
        false
    }
}

/// Zeroed, page-aligned heap memory.
///
/// Stands in for a mapped file in tests and benches where nothing has to
/// cross a process boundary.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the allocation is uniquely owned and freed on drop.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

const HEAP_REGION_ALIGNMENT: usize = 4096;

impl HeapRegion {
    /// Allocate `len` zeroed bytes.
    ///
    /// # Panics
    /// Panics if `len` is zero.
    pub fn zeroed(len: usize) -> Self {
        assert!(len > 0, "HeapRegion must not be empty");
        let layout = match Layout::from_size_align(len, HEAP_REGION_ALIGNMENT) {
            Ok(layout) => layout,
            Err(_) => panic!("HeapRegion of {len} bytes exceeds the address space"),
        };
        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => handle_alloc_error(layout),
        };
        Self { ptr, layout }
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: allocated in `zeroed` with the same layout.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

unsafe impl Region for HeapRegion {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn len(&self) -> usize {
        self.layout.size()
    }
}
