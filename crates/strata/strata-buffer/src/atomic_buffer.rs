use crate::region::Region;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// A bounds-checked view over part of a shared [`Region`].
///
/// Cloning is cheap and shares the region. Offsets passed to accessors are
/// relative to the start of the view.
///
/// Plain accessors (`get_*` / `put_*`) use native byte order and no ordering
/// guarantees. The `_volatile` loads are `Acquire` and the `_ordered` stores
/// are `Release`; pair them to publish data written with plain stores.
///
/// # Panics
/// Every accessor panics if the access falls outside the view, if an atomic
/// access is not naturally aligned, or if a store targets a read-only region.
/// Offsets derived from shared memory must be validated by the caller first.
#[derive(Clone)]
pub struct AtomicBuffer {
    region: Arc<dyn Region>,
    ptr: NonNull<u8>,
    len: usize,
    writable: bool,
}

// SAFETY: the region is Send + Sync and kept alive by the Arc; concurrent
// access to the bytes is the shared-memory protocol's responsibility.
unsafe impl Send for AtomicBuffer {}
unsafe impl Sync for AtomicBuffer {}

impl AtomicBuffer {
    /// View the whole region.
    pub fn new(region: Arc<dyn Region>) -> Self {
        let ptr = NonNull::new(region.as_ptr()).unwrap_or(NonNull::dangling());
        let len = region.len();
        let writable = region.is_writable();
        Self {
            region,
            ptr,
            len,
            writable,
        }
    }

    /// A narrower view sharing the same region.
    pub fn view(&self, offset: usize, len: usize) -> Self {
        self.check_bounds(offset, len);
        Self {
            region: Arc::clone(&self.region),
            // SAFETY: in bounds, checked above.
            ptr: unsafe { NonNull::new_unchecked(self.ptr.as_ptr().add(offset)) },
            len,
            writable: self.writable,
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.len
    }

    #[inline(always)]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    #[inline(always)]
    fn check_bounds(&self, index: usize, len: usize) {
        let in_bounds = match index.checked_add(len) {
            Some(end) => end <= self.len,
            None => false,
        };
        assert!(
            in_bounds,
            "access of {len} bytes at {index} is out of bounds for a buffer of {} bytes",
            self.len
        );
    }

    #[inline(always)]
    fn check_aligned(&self, index: usize, alignment: usize) {
        let address = self.ptr.as_ptr() as usize + index;
        assert!(
            address % alignment == 0,
            "atomic access at {index} is not {alignment}-byte aligned"
        );
    }

    #[inline(always)]
    fn check_writable(&self) {
        assert!(self.writable, "store into a read-only buffer");
    }

    #[inline(always)]
    fn at(&self, index: usize) -> *mut u8 {
        // SAFETY: callers check bounds first.
        unsafe { self.ptr.as_ptr().add(index) }
    }

    #[inline(always)]
    fn atomic_i32(&self, index: usize) -> &AtomicI32 {
        self.check_bounds(index, 4);
        self.check_aligned(index, 4);
        // SAFETY: in bounds and aligned; AtomicI32 has the layout of i32.
        unsafe { &*(self.at(index) as *const AtomicI32) }
    }

    #[inline(always)]
    fn atomic_i64(&self, index: usize) -> &AtomicI64 {
        self.check_bounds(index, 8);
        self.check_aligned(index, 8);
        // SAFETY: in bounds and aligned; AtomicI64 has the layout of i64.
        unsafe { &*(self.at(index) as *const AtomicI64) }
    }

    #[inline]
    pub fn get_u8(&self, index: usize) -> u8 {
        self.check_bounds(index, 1);
        unsafe { ptr::read(self.at(index)) }
    }

    #[inline]
    pub fn put_u8(&self, index: usize, value: u8) {
        self.check_writable();
        self.check_bounds(index, 1);
        unsafe { ptr::write(self.at(index), value) }
    }

    #[inline]
    pub fn get_u16(&self, index: usize) -> u16 {
        self.check_bounds(index, 2);
        unsafe { ptr::read_unaligned(self.at(index) as *const u16) }
    }

    #[inline]
    pub fn put_u16(&self, index: usize, value: u16) {
        self.check_writable();
        self.check_bounds(index, 2);
        unsafe { ptr::write_unaligned(self.at(index) as *mut u16, value) }
    }

    #[inline]
    pub fn get_i32(&self, index: usize) -> i32 {
        self.check_bounds(index, 4);
        unsafe { ptr::read_unaligned(self.at(index) as *const i32) }
    }

    #[inline]
    pub fn put_i32(&self, index: usize, value: i32) {
        self.check_writable();
        self.check_bounds(index, 4);
        unsafe { ptr::write_unaligned(self.at(index) as *mut i32, value) }
    }

    #[inline]
    pub fn get_i64(&self, index: usize) -> i64 {
        self.check_bounds(index, 8);
        unsafe { ptr::read_unaligned(self.at(index) as *const i64) }
    }

    #[inline]
    pub fn put_i64(&self, index: usize, value: i64) {
        self.check_writable();
        self.check_bounds(index, 8);
        unsafe { ptr::write_unaligned(self.at(index) as *mut i64, value) }
    }

    /// Acquire load.
    #[inline]
    pub fn get_i32_volatile(&self, index: usize) -> i32 {
        self.atomic_i32(index).load(Ordering::Acquire)
    }

    /// Release store.
    #[inline]
    pub fn put_i32_ordered(&self, index: usize, value: i32) {
        self.check_writable();
        self.atomic_i32(index).store(value, Ordering::Release);
    }

    #[inline]
    pub fn compare_and_set_i32(&self, index: usize, expected: i32, update: i32) -> bool {
        self.check_writable();
        self.atomic_i32(index)
            .compare_exchange(expected, update, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Atomically add `delta`, returning the previous value.
    #[inline]
    pub fn get_and_add_i32(&self, index: usize, delta: i32) -> i32 {
        self.check_writable();
        self.atomic_i32(index).fetch_add(delta, Ordering::AcqRel)
    }

    /// Acquire load.
    #[inline]
    pub fn get_i64_volatile(&self, index: usize) -> i64 {
        self.atomic_i64(index).load(Ordering::Acquire)
    }

    /// Release store.
    #[inline]
    pub fn put_i64_ordered(&self, index: usize, value: i64) {
        self.check_writable();
        self.atomic_i64(index).store(value, Ordering::Release);
    }

    /// Atomically add `delta`, returning the previous value.
    #[inline]
    pub fn get_and_add_i64(&self, index: usize, delta: i64) -> i64 {
        self.check_writable();
        self.atomic_i64(index).fetch_add(delta, Ordering::AcqRel)
    }

    /// Copy `dst.len()` bytes starting at `index` into `dst`.
    #[inline]
    pub fn get_bytes(&self, index: usize, dst: &mut [u8]) {
        self.check_bounds(index, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.at(index), dst.as_mut_ptr(), dst.len()) }
    }

    #[inline]
    pub fn put_bytes(&self, index: usize, src: &[u8]) {
        self.check_writable();
        self.check_bounds(index, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.at(index), src.len()) }
    }

    /// Copy `len` bytes from `src` at `src_index` into this buffer at `index`.
    #[inline]
    pub fn put_buffer(&self, index: usize, src: &AtomicBuffer, src_index: usize, len: usize) {
        self.check_writable();
        self.check_bounds(index, len);
        src.check_bounds(src_index, len);
        unsafe { ptr::copy(src.at(src_index), self.at(index), len) }
    }

    #[inline]
    pub fn set_memory(&self, index: usize, len: usize, value: u8) {
        self.check_writable();
        self.check_bounds(index, len);
        unsafe { ptr::write_bytes(self.at(index), value, len) }
    }

    /// Borrow `len` bytes at `index`.
    ///
    /// Another process may overwrite these bytes once the protocol that
    /// published them moves on, so the slice must not outlive the callback or
    /// scan that produced it.
    #[inline]
    pub fn bytes(&self, index: usize, len: usize) -> &[u8] {
        self.check_bounds(index, len);
        unsafe { std::slice::from_raw_parts(self.at(index), len) }
    }
}

impl fmt::Debug for AtomicBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicBuffer")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("writable", &self.writable)
            .finish()
    }
}
