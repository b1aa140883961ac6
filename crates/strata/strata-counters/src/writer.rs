//! Writer side of the counters directory.
//!
//! In production the directory belongs to the driver process. This writer
//! lays out and maintains a directory the same way so tools, tests and the
//! demo binaries have something real to map.

use crate::error::{CountersError, Result};
use crate::layout::{
    COUNTERS_MAGIC, COUNTERS_VERSION, DirectoryLayout, KEY_OFFSET, LABEL_LENGTH_OFFSET,
    LABEL_OFFSET, MAGIC_OFFSET, MAX_KEY_LENGTH, MAX_LABEL_LENGTH, METADATA_LENGTH,
    METADATA_LENGTH_OFFSET, RECORD_ALLOCATED, RECORD_RECLAIMED, RECORD_UNUSED, STATE_OFFSET,
    TYPE_ID_OFFSET, VALUE_LENGTH, VALUES_LENGTH_OFFSET, VERSION_OFFSET, metadata_offset,
    value_offset,
};
use crate::reader::CountersReader;
use std::path::Path;
use std::sync::Arc;
use strata_buffer::AtomicBuffer;
use strata_mmap::MmapFileMut;
use tracing::debug;

/// Allocates, updates and reclaims counters.
///
/// Only one writer should exist per directory. Reclaimed slots are never
/// reused, so a slot's label can never change under a reader.
pub struct CountersWriter {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    capacity: usize,
    next_id: usize,
}

/// A handle to one allocated counter's value.
#[derive(Debug, Clone)]
pub struct AtomicCounter {
    values: AtomicBuffer,
    offset: usize,
    id: i32,
}

impl AtomicCounter {
    pub fn id(&self) -> i32 {
        self.id
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.values.get_i64_volatile(self.offset)
    }

    #[inline]
    pub fn set(&self, value: i64) {
        self.values.put_i64_ordered(self.offset, value);
    }

    /// Add `delta`, returning the previous value.
    #[inline]
    pub fn add(&self, delta: i64) -> i64 {
        self.values.get_and_add_i64(self.offset, delta)
    }

    #[inline]
    pub fn increment(&self) -> i64 {
        self.add(1)
    }
}

impl CountersWriter {
    /// Create a counters file at `path` and write its header.
    ///
    /// The magic number is stored last, with release ordering, so a reader
    /// that sees it also sees the lengths.
    pub fn create<P: AsRef<Path>>(path: P, layout: DirectoryLayout) -> Result<Self> {
        let path = path.as_ref();
        let file = MmapFileMut::create_rw(path, layout.total_length() as u64).map_err(|source| {
            CountersError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?;
        let file = AtomicBuffer::new(Arc::new(file));

        file.put_i32(VERSION_OFFSET, COUNTERS_VERSION);
        file.put_i64(METADATA_LENGTH_OFFSET, layout.metadata_length as i64);
        file.put_i64(VALUES_LENGTH_OFFSET, layout.values_length as i64);
        file.put_i64_ordered(MAGIC_OFFSET, COUNTERS_MAGIC as i64);

        debug!(path = %path.display(), capacity = layout.capacity(), "created counters directory");
        Ok(Self::new(
            file.view(layout.metadata_offset(), layout.metadata_length),
            file.view(layout.values_offset(), layout.values_length),
        ))
    }

    /// Writer over already laid out metadata and values regions.
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        let capacity =
            (metadata.capacity() / METADATA_LENGTH).min(values.capacity() / VALUE_LENGTH);
        Self {
            metadata,
            values,
            capacity,
            next_id: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A reader over the same regions.
    pub fn reader(&self) -> CountersReader {
        CountersReader::new(self.metadata.clone(), self.values.clone())
    }

    /// Allocate the lowest unused slot.
    ///
    /// Labels longer than the record allows are truncated at a char boundary.
    pub fn allocate(&mut self, type_id: i32, label: &str) -> Result<AtomicCounter> {
        self.allocate_with_key(type_id, &[], label)
    }

    /// Allocate with opaque key bytes (at most 112 are kept).
    pub fn allocate_with_key(
        &mut self,
        type_id: i32,
        key: &[u8],
        label: &str,
    ) -> Result<AtomicCounter> {
        let id = self.next_unused()?;
        let record = metadata_offset(id);
        let label = truncate_label(label);
        let key = &key[..key.len().min(MAX_KEY_LENGTH)];

        self.metadata.put_i32(record + TYPE_ID_OFFSET, type_id);
        self.metadata.set_memory(record + KEY_OFFSET, MAX_KEY_LENGTH, 0);
        self.metadata.put_bytes(record + KEY_OFFSET, key);
        self.metadata
            .put_i32(record + LABEL_LENGTH_OFFSET, label.len() as i32);
        self.metadata.put_bytes(record + LABEL_OFFSET, label.as_bytes());
        self.values.put_i64_ordered(value_offset(id), 0);

        self.metadata
            .put_i32_ordered(record + STATE_OFFSET, RECORD_ALLOCATED);
        self.next_id = id + 1;

        debug!(id, type_id, label, "allocated counter");
        Ok(AtomicCounter {
            values: self.values.clone(),
            offset: value_offset(id),
            id: id as i32,
        })
    }

    /// Mark an allocated counter reclaimed. Readers stop reporting it.
    pub fn free(&mut self, id: i32) -> Result<()> {
        let slot = match usize::try_from(id) {
            Ok(slot) if slot < self.capacity => slot,
            _ => return Err(CountersError::NotFound(id)),
        };
        let state_index = metadata_offset(slot) + STATE_OFFSET;
        if self.metadata.get_i32_volatile(state_index) != RECORD_ALLOCATED {
            return Err(CountersError::NotFound(id));
        }
        self.metadata.put_i32_ordered(state_index, RECORD_RECLAIMED);
        debug!(id, "reclaimed counter");
        Ok(())
    }

    fn next_unused(&self) -> Result<usize> {
        (self.next_id..self.capacity)
            .find(|&id| {
                self.metadata
                    .get_i32_volatile(metadata_offset(id) + STATE_OFFSET)
                    == RECORD_UNUSED
            })
            .ok_or(CountersError::DirectoryFull {
                capacity: self.capacity,
            })
    }
}

fn truncate_label(label: &str) -> &str {
    if label.len() <= MAX_LABEL_LENGTH {
        return label;
    }
    let mut end = MAX_LABEL_LENGTH;
    while !label.is_char_boundary(end) {
        end -= 1;
    }
    &label[..end]
}
