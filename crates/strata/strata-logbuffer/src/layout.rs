//! Log file layout and position arithmetic.
//!
//! # Metadata page
//!
//! ```text
//! offset  field
//! 0       tail counters         3 x i64 (term id << 32 | tail offset)
//! 24      active term count     i32
//! 64      magic                 u64 "STRATALG", stored last
//! 72      version               i32
//! 76      initial term id       i32
//! 80      term length           i32
//! 84      mtu                   i32
//! 88      session id            i32
//! 92      stream id             i32
//! 128     subscriber count      i32
//! 256     subscriber slots      60 x 64 bytes (state i32 @0, position i64 @8)
//! ```

pub const PARTITION_COUNT: usize = 3;
pub const LOG_META_DATA_LENGTH: usize = 4096;

pub const TERM_TAIL_COUNTERS_OFFSET: usize = 0;
pub const ACTIVE_TERM_COUNT_OFFSET: usize = TERM_TAIL_COUNTERS_OFFSET + PARTITION_COUNT * 8;

/// ASCII encoding of "STRATALG".
pub const LOG_MAGIC: u64 = 0x5354_5241_5441_4C47;
pub const LOG_VERSION: i32 = 1;

pub const MAGIC_OFFSET: usize = 64;
pub const VERSION_OFFSET: usize = 72;
pub const INITIAL_TERM_ID_OFFSET: usize = 76;
pub const TERM_LENGTH_OFFSET: usize = 80;
pub const MTU_OFFSET: usize = 84;
pub const SESSION_ID_OFFSET: usize = 88;
pub const STREAM_ID_OFFSET: usize = 92;

pub const SUBSCRIBER_COUNT_OFFSET: usize = 128;
pub const SUBSCRIBER_SLOTS_OFFSET: usize = 256;
pub const SUBSCRIBER_SLOT_LENGTH: usize = 64;
pub const MAX_SUBSCRIBERS: usize =
    (LOG_META_DATA_LENGTH - SUBSCRIBER_SLOTS_OFFSET) / SUBSCRIBER_SLOT_LENGTH;
pub const SLOT_STATE_OFFSET: usize = 0;
pub const SLOT_POSITION_OFFSET: usize = 8;

pub const SLOT_FREE: i32 = 0;
pub const SLOT_ACTIVE: i32 = 1;
/// Claimed but position not yet published.
pub const SLOT_CLAIMING: i32 = 2;

const TAIL_OFFSET_MASK: i64 = 0xFFFF_FFFF;

/// Total file length for a log of `term_length` terms.
pub const fn log_length(term_length: usize) -> usize {
    PARTITION_COUNT * term_length + LOG_META_DATA_LENGTH
}

#[inline]
pub const fn tail_counter_offset(partition: usize) -> usize {
    TERM_TAIL_COUNTERS_OFFSET + partition * 8
}

#[inline]
pub const fn subscriber_slot_offset(slot: usize) -> usize {
    SUBSCRIBER_SLOTS_OFFSET + slot * SUBSCRIBER_SLOT_LENGTH
}

/// Partition holding the term with this term count.
#[inline]
pub fn index_by_term_count(term_count: i32) -> usize {
    (term_count as u32 as usize) % PARTITION_COUNT
}

#[inline]
pub fn pack_tail(term_id: i32, term_offset: i32) -> i64 {
    ((term_id as i64) << 32) | (term_offset as i64 & TAIL_OFFSET_MASK)
}

#[inline]
pub fn term_id(raw_tail: i64) -> i32 {
    (raw_tail >> 32) as i32
}

/// Tail offset, which may run past the term length once a term is tripped.
#[inline]
pub fn raw_tail_offset(raw_tail: i64) -> i64 {
    raw_tail & TAIL_OFFSET_MASK
}

/// Tail offset clamped to the term.
#[inline]
pub fn term_offset(raw_tail: i64, term_length: usize) -> i64 {
    raw_tail_offset(raw_tail).min(term_length as i64)
}

/// `(term_id - initial_term_id) << bits + term_offset`.
#[inline]
pub fn compute_position(
    term_id: i32,
    term_offset: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
) -> i64 {
    let term_count = term_id.wrapping_sub(initial_term_id) as i64;
    (term_count << position_bits_to_shift) + term_offset
}

#[inline]
pub fn compute_term_count(position: i64, position_bits_to_shift: u32) -> i32 {
    (position >> position_bits_to_shift) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_fields_fit_the_page() {
        assert_eq!(ACTIVE_TERM_COUNT_OFFSET, 24);
        assert_eq!(MAX_SUBSCRIBERS, 60);
        assert_eq!(
            subscriber_slot_offset(MAX_SUBSCRIBERS - 1) + SUBSCRIBER_SLOT_LENGTH,
            LOG_META_DATA_LENGTH
        );
        assert_eq!(log_length(1024), 3 * 1024 + 4096);
    }

    #[test]
    fn tail_counters_pack_term_id_and_offset() {
        let raw = pack_tail(-2, 96);
        assert_eq!(term_id(raw), -2);
        assert_eq!(raw_tail_offset(raw), 96);

        let tripped = pack_tail(5, 1024) + 64;
        assert_eq!(raw_tail_offset(tripped), 1088);
        assert_eq!(term_offset(tripped, 1024), 1024);
    }

    #[test]
    fn positions_combine_term_count_and_offset() {
        assert_eq!(compute_position(7, 0, 10, 7), 0);
        assert_eq!(compute_position(9, 64, 10, 7), 2 * 1024 + 64);
        assert_eq!(compute_term_count(2 * 1024 + 64, 10), 2);
        // Term ids wrap; positions keep counting.
        assert_eq!(compute_position(i32::MIN, 0, 16, i32::MAX), 1 << 16);
    }

    #[test]
    fn partitions_rotate_by_term_count() {
        let indexes: Vec<usize> = (0..6).map(index_by_term_count).collect();
        assert_eq!(indexes, vec![0, 1, 2, 0, 1, 2]);
    }
}
