//! Bounds-checked access to shared memory.
//!
//! Every structure Strata places in shared memory (counter records, log
//! terms, frame headers) is read and written through an [`AtomicBuffer`]: a
//! view of `(region, offset, length)` whose accessors check bounds and, for
//! atomic accessors, natural alignment before touching memory.

mod atomic_buffer;
mod region;

pub use atomic_buffer::AtomicBuffer;
pub use region::{HeapRegion, Region};

/// Cache line size assumed for padding shared records.
pub const CACHE_LINE_LENGTH: usize = 64;

/// Round `value` up to the next multiple of `alignment` (a power of two).
///
/// ```
/// use strata_buffer::align;
/// assert_eq!(align(0, 32), 0);
/// assert_eq!(align(33, 32), 64);
/// assert_eq!(align(64, 32), 64);
/// ```
#[inline(always)]
pub const fn align(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}
