//! File-backed shared memory maps.
//!
//! Both the counters directory and the log buffers are plain files (usually
//! under `/dev/shm`) mapped `MAP_SHARED`, so every process that maps the same
//! path sees the same bytes.

use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    ptr::NonNull,
};
use tracing::debug;

/// A file mapped read-write.
pub struct MmapFileMut {
    _file: File,
    /// Start of the mapping, captured once so shared references can hand it out.
    base: NonNull<u8>,
    mmap: MmapMut,
}

/// A file mapped read-only.
pub struct MmapFile {
    _file: File,
    mmap: Mmap,
}

// SAFETY: the mapping is owned by the struct and lives until drop; all
// concurrent access to the bytes goes through atomics in the callers.
unsafe impl Send for MmapFileMut {}
unsafe impl Sync for MmapFileMut {}

impl MmapFileMut {
    /// Create (or truncate) the file at `path` to `size_bytes` and map it read-write.
    ///
    /// A freshly sized file reads as zeroes.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), size_bytes, "created shared file");
        Ok(Self::from_parts(file, mmap))
    }

    /// Open an existing file and map it read-write.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = %path.display(), len = mmap.len(), "mapped shared file read-write");
        Ok(Self::from_parts(file, mmap))
    }

    fn from_parts(file: File, mut mmap: MmapMut) -> Self {
        let base = NonNull::new(mmap.as_mut_ptr()).unwrap_or(NonNull::dangling());
        Self {
            _file: file,
            base,
            mmap,
        }
    }

    /// Return raw pointer to start of memory mapped file data
    #[inline]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// Flush dirty pages back to the file.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

impl MmapFile {
    /// Open an existing file and map it read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;

        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), len = mmap.len(), "mapped shared file read-only");
        Ok(Self { _file: file, mmap })
    }

    /// Return raw pointer to start of memory mapped file data
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}
