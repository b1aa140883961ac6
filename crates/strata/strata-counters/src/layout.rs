//! Binary layout of the counters directory file.
//!
//! The file is created and sized by an external writer (the driver, or
//! [`CountersWriter`](crate::CountersWriter) standing in for it). Readers map
//! it read-only and trust the lengths recorded in the header once the header
//! has been validated.
//!
//! # Memory Layout
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     DirectoryHeader (64B)                      │
//! │  ┌──────────┬──────────┬──────────┬─────────────────────────┐  │
//! │  │  magic   │ version  │ metadata │  values length          │  │
//! │  │  (8B)    │ (4B+pad) │ len (8B) │  (8B)                   │  │
//! │  └──────────┴──────────┴──────────┴─────────────────────────┘  │
//! ├────────────────────────────────────────────────────────────────┤
//! │              metadata record[0..capacity] (512B each)          │
//! │  ┌───────┬─────────┬──────────┬───────────┬────────┬────────┐  │
//! │  │ state │ type id │ reserved │ key       │ label  │ label  │  │
//! │  │ (4B)  │ (4B)    │ (8B)     │ (112B)    │ len 4B │ (380B) │  │
//! │  └───────┴─────────┴──────────┴───────────┴────────┴────────┘  │
//! ├────────────────────────────────────────────────────────────────┤
//! │              value record[0..capacity] (64B each)              │
//! │  ┌──────────────────┬─────────────────────────────────────┐    │
//! │  │  value (8B)      │  padding to a cache line            │    │
//! │  └──────────────────┴─────────────────────────────────────┘    │
//! └────────────────────────────────────────────────────────────────┘
//! ```

use strata_buffer::CACHE_LINE_LENGTH;

/// Magic number identifying a counters directory file.
///
/// ASCII encoding of "STRATACN": `0x5354_5241_5441_434E`.
pub const COUNTERS_MAGIC: u64 = 0x5354_5241_5441_434E;

/// Current layout version. Readers reject any other value.
pub const COUNTERS_VERSION: i32 = 1;

pub const HEADER_LENGTH: usize = CACHE_LINE_LENGTH;
pub const MAGIC_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 8;
pub const METADATA_LENGTH_OFFSET: usize = 16;
pub const VALUES_LENGTH_OFFSET: usize = 24;

/// Length of one metadata record.
pub const METADATA_LENGTH: usize = 512;
pub const STATE_OFFSET: usize = 0;
pub const TYPE_ID_OFFSET: usize = 4;
pub const KEY_OFFSET: usize = 16;
pub const MAX_KEY_LENGTH: usize = LABEL_LENGTH_OFFSET - KEY_OFFSET;
pub const LABEL_LENGTH_OFFSET: usize = 128;
pub const LABEL_OFFSET: usize = LABEL_LENGTH_OFFSET + 4;
pub const MAX_LABEL_LENGTH: usize = METADATA_LENGTH - LABEL_OFFSET;

/// Length of one value record: the value padded to its own cache line.
pub const VALUE_LENGTH: usize = CACHE_LINE_LENGTH;

pub const RECORD_UNUSED: i32 = 0;
pub const RECORD_ALLOCATED: i32 = 1;
pub const RECORD_RECLAIMED: i32 = -1;

/// Lifecycle of a counter slot.
///
/// Slots only move forward: `Unused -> Allocated -> Reclaimed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterState {
    Unused,
    Allocated,
    Reclaimed,
}

impl CounterState {
    /// Decode a raw state word. Unknown values decode to `None` and are
    /// treated like any other not-allocated slot.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            RECORD_UNUSED => Some(Self::Unused),
            RECORD_ALLOCATED => Some(Self::Allocated),
            RECORD_RECLAIMED => Some(Self::Reclaimed),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Self::Unused => RECORD_UNUSED,
            Self::Allocated => RECORD_ALLOCATED,
            Self::Reclaimed => RECORD_RECLAIMED,
        }
    }
}

/// Sizes of the two regions that follow the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub metadata_length: usize,
    pub values_length: usize,
}

impl DirectoryLayout {
    /// Layout holding exactly `capacity` counters.
    pub fn for_capacity(capacity: usize) -> Self {
        Self {
            metadata_length: capacity * METADATA_LENGTH,
            values_length: capacity * VALUE_LENGTH,
        }
    }

    /// Number of usable slots; a region with a partial trailing record
    /// does not count that record.
    pub fn capacity(&self) -> usize {
        (self.metadata_length / METADATA_LENGTH).min(self.values_length / VALUE_LENGTH)
    }

    pub fn metadata_offset(&self) -> usize {
        HEADER_LENGTH
    }

    pub fn values_offset(&self) -> usize {
        HEADER_LENGTH + self.metadata_length
    }

    /// Total bytes needed for the file.
    pub fn total_length(&self) -> usize {
        HEADER_LENGTH + self.metadata_length + self.values_length
    }
}

#[inline(always)]
pub fn metadata_offset(id: usize) -> usize {
    id * METADATA_LENGTH
}

#[inline(always)]
pub fn value_offset(id: usize) -> usize {
    id * VALUE_LENGTH
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_fields_fit_their_records() {
        assert_eq!(MAX_KEY_LENGTH, 112);
        assert_eq!(MAX_LABEL_LENGTH, 380);
        assert_eq!(LABEL_OFFSET + MAX_LABEL_LENGTH, METADATA_LENGTH);
        assert!(VALUES_LENGTH_OFFSET + 8 <= HEADER_LENGTH);
    }

    #[test]
    fn layout_offsets_follow_the_header() {
        let layout = DirectoryLayout::for_capacity(4);
        assert_eq!(layout.capacity(), 4);
        assert_eq!(layout.metadata_offset(), 64);
        assert_eq!(layout.values_offset(), 64 + 4 * 512);
        assert_eq!(layout.total_length(), 64 + 4 * 512 + 4 * 64);
    }

    #[test]
    fn capacity_is_bounded_by_the_smaller_region() {
        let layout = DirectoryLayout {
            metadata_length: 10 * METADATA_LENGTH + 100,
            values_length: 3 * VALUE_LENGTH,
        };
        assert_eq!(layout.capacity(), 3);
    }

    #[test]
    fn state_words_decode() {
        assert_eq!(CounterState::from_raw(0), Some(CounterState::Unused));
        assert_eq!(CounterState::from_raw(1), Some(CounterState::Allocated));
        assert_eq!(CounterState::from_raw(-1), Some(CounterState::Reclaimed));
        assert_eq!(CounterState::from_raw(7), None);
        assert_eq!(CounterState::Reclaimed.as_raw(), RECORD_RECLAIMED);
    }
}
