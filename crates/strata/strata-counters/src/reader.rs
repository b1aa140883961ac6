//! Lock-free reads of the counters directory.
//!
//! # Protocol
//!
//! **Writer** (per slot):
//! 1. Write type id, key and label with plain stores
//! 2. Release-store `state = ALLOCATED`
//! 3. Update the value with release stores for as long as the counter lives
//! 4. Release-store `state = RECLAIMED`
//!
//! **Reader** (per slot, in ascending slot order):
//! 1. Acquire-load `state`; anything but ALLOCATED is skipped
//! 2. Read label and type id (immutable while ALLOCATED)
//! 3. Acquire-load the value (a single aligned 64-bit word, never torn)
//! 4. Acquire-load `state` again; if the slot was reclaimed meanwhile, skip it
//!
//! The reader never spins or retries: a slot that is mid-transition simply
//! drops out of this pass.

use crate::error::{CountersError, Result};
use crate::layout::{
    CounterState, LABEL_LENGTH_OFFSET, LABEL_OFFSET, MAX_LABEL_LENGTH, METADATA_LENGTH,
    RECORD_ALLOCATED, STATE_OFFSET, TYPE_ID_OFFSET, VALUE_LENGTH, metadata_offset, value_offset,
};
use strata_buffer::AtomicBuffer;

/// Snapshot of one allocated counter, as produced by [`CountersReader::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub id: i32,
    pub type_id: i32,
    pub label: String,
    pub value: i64,
}

/// Receives each allocated counter during a scan.
///
/// Implemented for every `FnMut(Counter)`.
pub trait CounterVisitor {
    fn visit(&mut self, counter: Counter);
}

impl<F: FnMut(Counter)> CounterVisitor for F {
    #[inline]
    fn visit(&mut self, counter: Counter) {
        self(counter)
    }
}

/// Read side of a counters directory over injected metadata and values views.
#[derive(Debug, Clone)]
pub struct CountersReader {
    metadata: AtomicBuffer,
    values: AtomicBuffer,
    capacity: usize,
}

impl CountersReader {
    pub fn new(metadata: AtomicBuffer, values: AtomicBuffer) -> Self {
        let capacity =
            (metadata.capacity() / METADATA_LENGTH).min(values.capacity() / VALUE_LENGTH);
        Self {
            metadata,
            values,
            capacity,
        }
    }

    /// Number of slots in the directory.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn metadata_buffer(&self) -> &AtomicBuffer {
        &self.metadata
    }

    pub fn values_buffer(&self) -> &AtomicBuffer {
        &self.values
    }

    /// Visit every allocated counter in ascending id order.
    ///
    /// Returns the number of counters visited. Fails fast with
    /// [`CountersError::DataCorruption`] on a record whose label length is out
    /// of bounds; counters visited before it have already been delivered.
    pub fn scan<V: CounterVisitor + ?Sized>(&self, visitor: &mut V) -> Result<usize> {
        let mut visited = 0;
        for id in 0..self.capacity {
            let record = metadata_offset(id);
            if self.metadata.get_i32_volatile(record + STATE_OFFSET) != RECORD_ALLOCATED {
                continue;
            }

            let label = self.read_label(id)?;
            let type_id = self.metadata.get_i32(record + TYPE_ID_OFFSET);
            let value = self.values.get_i64_volatile(value_offset(id));

            if self.metadata.get_i32_volatile(record + STATE_OFFSET) != RECORD_ALLOCATED {
                continue;
            }

            visitor.visit(Counter {
                id: id as i32,
                type_id,
                label,
                value,
            });
            visited += 1;
        }
        Ok(visited)
    }

    /// Current value of an allocated counter.
    pub fn get_value(&self, id: i32) -> Result<i64> {
        let slot = self.allocated_slot(id)?;
        Ok(self.values.get_i64_volatile(value_offset(slot)))
    }

    /// State of the slot `id`, or `NotFound` when `id` is out of range.
    ///
    /// Unknown raw state words report as `Unused`.
    pub fn counter_state(&self, id: i32) -> Result<CounterState> {
        let slot = self.slot(id)?;
        let raw = self
            .metadata
            .get_i32_volatile(metadata_offset(slot) + STATE_OFFSET);
        Ok(CounterState::from_raw(raw).unwrap_or(CounterState::Unused))
    }

    pub fn counter_label(&self, id: i32) -> Result<String> {
        let slot = self.allocated_slot(id)?;
        self.read_label(slot)
    }

    pub fn counter_type_id(&self, id: i32) -> Result<i32> {
        let slot = self.allocated_slot(id)?;
        Ok(self.metadata.get_i32(metadata_offset(slot) + TYPE_ID_OFFSET))
    }

    /// Id of the first allocated counter with this type id and label.
    pub fn find_counter(&self, type_id: i32, label: &str) -> Result<Option<i32>> {
        let mut found = None;
        self.scan(&mut |counter: Counter| {
            if found.is_none() && counter.type_id == type_id && counter.label == label {
                found = Some(counter.id);
            }
        })?;
        Ok(found)
    }

    fn slot(&self, id: i32) -> Result<usize> {
        match usize::try_from(id) {
            Ok(slot) if slot < self.capacity => Ok(slot),
            _ => Err(CountersError::NotFound(id)),
        }
    }

    fn allocated_slot(&self, id: i32) -> Result<usize> {
        let slot = self.slot(id)?;
        let state = self
            .metadata
            .get_i32_volatile(metadata_offset(slot) + STATE_OFFSET);
        if state == RECORD_ALLOCATED {
            Ok(slot)
        } else {
            Err(CountersError::NotFound(id))
        }
    }

    fn read_label(&self, slot: usize) -> Result<String> {
        let record = metadata_offset(slot);
        let length = self.metadata.get_i32(record + LABEL_LENGTH_OFFSET);
        let len = match usize::try_from(length) {
            Ok(len) if len <= MAX_LABEL_LENGTH => len,
            _ => {
                tracing::warn!(id = slot, length, "counter record has a corrupt label length");
                return Err(CountersError::DataCorruption {
                    id: slot as i32,
                    length,
                    max: MAX_LABEL_LENGTH,
                });
            }
        };
        let bytes = self.metadata.bytes(record + LABEL_OFFSET, len);
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}
