use crate::error::{CountersError, Result};
use crate::layout::{
    COUNTERS_MAGIC, COUNTERS_VERSION, DirectoryLayout, HEADER_LENGTH, MAGIC_OFFSET,
    METADATA_LENGTH_OFFSET, VALUES_LENGTH_OFFSET, VERSION_OFFSET,
};
use crate::reader::{CounterVisitor, CountersReader};
use std::path::Path;
use std::sync::Arc;
use strata_buffer::AtomicBuffer;
use strata_mmap::MmapFile;
use tracing::debug;

/// A counters directory file mapped read-only.
///
/// Mapping validates the header once; after that every scan and lookup works
/// on the mapped views without touching the file system.
#[derive(Debug, Clone)]
pub struct CountersDirectory {
    layout: DirectoryLayout,
    reader: CountersReader,
}

impl CountersDirectory {
    /// Map an existing counters file.
    ///
    /// # Errors
    /// - `Io` if the file is missing or cannot be mapped
    /// - `Undersized` if the file is shorter than its header declares
    /// - `BadMagic` / `UnsupportedVersion` if it is not a counters file this
    ///   code understands
    /// - `CorruptHeader` if the declared lengths are negative or overflow
    pub fn map<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = MmapFile::open_ro(path).map_err(|source| CountersError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let actual = file.len();
        if actual < HEADER_LENGTH {
            return Err(CountersError::Undersized {
                expected: HEADER_LENGTH,
                actual,
            });
        }

        let file = AtomicBuffer::new(Arc::new(file));
        let layout = validate_header(&file)?;
        if layout.total_length() > actual {
            return Err(CountersError::Undersized {
                expected: layout.total_length(),
                actual,
            });
        }

        debug!(path = %path.display(), capacity = layout.capacity(), "mapped counters directory");
        let reader = CountersReader::new(
            file.view(layout.metadata_offset(), layout.metadata_length),
            file.view(layout.values_offset(), layout.values_length),
        );
        Ok(Self { layout, reader })
    }

    pub fn layout(&self) -> DirectoryLayout {
        self.layout
    }

    pub fn metadata_buffer(&self) -> &AtomicBuffer {
        self.reader.metadata_buffer()
    }

    pub fn values_buffer(&self) -> &AtomicBuffer {
        self.reader.values_buffer()
    }

    pub fn reader(&self) -> &CountersReader {
        &self.reader
    }

    /// See [`CountersReader::scan`].
    pub fn scan<V: CounterVisitor + ?Sized>(&self, visitor: &mut V) -> Result<usize> {
        self.reader.scan(visitor)
    }

    /// See [`CountersReader::get_value`].
    pub fn get_value(&self, id: i32) -> Result<i64> {
        self.reader.get_value(id)
    }
}

fn validate_header(file: &AtomicBuffer) -> Result<DirectoryLayout> {
    let magic = file.get_i64_volatile(MAGIC_OFFSET) as u64;
    if magic != COUNTERS_MAGIC {
        return Err(CountersError::BadMagic(magic));
    }
    let version = file.get_i32(VERSION_OFFSET);
    if version != COUNTERS_VERSION {
        return Err(CountersError::UnsupportedVersion(version));
    }

    let metadata_length = usize::try_from(file.get_i64(METADATA_LENGTH_OFFSET))
        .map_err(|_| CountersError::CorruptHeader("negative metadata length"))?;
    let values_length = usize::try_from(file.get_i64(VALUES_LENGTH_OFFSET))
        .map_err(|_| CountersError::CorruptHeader("negative values length"))?;
    HEADER_LENGTH
        .checked_add(metadata_length)
        .and_then(|total| total.checked_add(values_length))
        .ok_or(CountersError::CorruptHeader("region lengths overflow"))?;
    Ok(DirectoryLayout {
        metadata_length,
        values_length,
    })
}
