//! Frame header layout and accessors.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |R|                       Frame Length                          |
//! +---------------+-+-+-----------+-------------------------------+
//! |   Version     |B|E|   Flags   |             Type              |
//! +---------------+-+-+-----------+-------------------------------+
//! |                          Term Offset                          |
//! +---------------------------------------------------------------+
//! |                          Session ID                           |
//! +---------------------------------------------------------------+
//! |                          Stream ID                            |
//! +---------------------------------------------------------------+
//! |                           Term ID                             |
//! +---------------------------------------------------------------+
//! |                        Reserved Value                         |
//! |                                                               |
//! +---------------------------------------------------------------+
//! ```
//!
//! Frame length is the commit marker: it stays zero until header and payload
//! are written, then is release-stored.

use crate::layout::compute_position;
use strata_buffer::{AtomicBuffer, align};

pub const HEADER_LENGTH: usize = 32;
pub const FRAME_ALIGNMENT: usize = 32;

pub const FRAME_LENGTH_OFFSET: usize = 0;
pub const VERSION_OFFSET: usize = 4;
pub const FLAGS_OFFSET: usize = 5;
pub const TYPE_OFFSET: usize = 6;
pub const TERM_OFFSET_OFFSET: usize = 8;
pub const SESSION_ID_OFFSET: usize = 12;
pub const STREAM_ID_OFFSET: usize = 16;
pub const TERM_ID_OFFSET: usize = 20;
pub const RESERVED_VALUE_OFFSET: usize = 24;

pub const CURRENT_VERSION: u8 = 0;

pub const FRAME_TYPE_PAD: u16 = 0;
pub const FRAME_TYPE_DATA: u16 = 1;

pub const BEGIN_FRAG_FLAG: u8 = 0x80;
pub const END_FRAG_FLAG: u8 = 0x40;
pub const UNFRAGMENTED: u8 = BEGIN_FRAG_FLAG | END_FRAG_FLAG;

#[inline]
pub fn frame_length_volatile(term: &AtomicBuffer, offset: usize) -> i32 {
    term.get_i32_volatile(offset + FRAME_LENGTH_OFFSET)
}

/// Commit a frame: release-store its length.
#[inline]
pub fn frame_length_ordered(term: &AtomicBuffer, offset: usize, length: i32) {
    term.put_i32_ordered(offset + FRAME_LENGTH_OFFSET, length);
}

#[inline]
pub fn frame_type(term: &AtomicBuffer, offset: usize) -> u16 {
    term.get_u16(offset + TYPE_OFFSET)
}

/// Bytes a message of `length` occupies in a term once split into frames
/// carrying at most `max_payload` bytes each.
pub fn required_length(length: usize, max_payload: usize) -> usize {
    if length <= max_payload {
        return align(length + HEADER_LENGTH, FRAME_ALIGNMENT);
    }
    let full_frames = length / max_payload;
    let remaining = length % max_payload;
    let last = if remaining > 0 {
        align(remaining + HEADER_LENGTH, FRAME_ALIGNMENT)
    } else {
        0
    };
    full_frames * align(max_payload + HEADER_LENGTH, FRAME_ALIGNMENT) + last
}

/// Stamps the fixed parts of a header. Leaves the frame length alone.
#[derive(Debug, Clone, Copy)]
pub struct HeaderWriter {
    session_id: i32,
    stream_id: i32,
}

impl HeaderWriter {
    pub fn new(session_id: i32, stream_id: i32) -> Self {
        Self {
            session_id,
            stream_id,
        }
    }

    pub fn write(
        &self,
        term: &AtomicBuffer,
        offset: usize,
        flags: u8,
        frame_type: u16,
        term_id: i32,
    ) {
        term.put_u8(offset + VERSION_OFFSET, CURRENT_VERSION);
        term.put_u8(offset + FLAGS_OFFSET, flags);
        term.put_u16(offset + TYPE_OFFSET, frame_type);
        term.put_i32(offset + TERM_OFFSET_OFFSET, offset as i32);
        term.put_i32(offset + SESSION_ID_OFFSET, self.session_id);
        term.put_i32(offset + STREAM_ID_OFFSET, self.stream_id);
        term.put_i32(offset + TERM_ID_OFFSET, term_id);
        term.put_i64(offset + RESERVED_VALUE_OFFSET, 0);
    }
}

/// Copy of a committed frame's header, handed to fragment handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    frame_length: i32,
    version: u8,
    flags: u8,
    frame_type: u16,
    term_offset: i32,
    session_id: i32,
    stream_id: i32,
    term_id: i32,
    reserved_value: i64,
    initial_term_id: i32,
    position_bits_to_shift: u32,
}

impl Header {
    /// Read the header at `offset`. The caller has already acquired the
    /// frame length.
    pub fn read(
        term: &AtomicBuffer,
        offset: usize,
        initial_term_id: i32,
        position_bits_to_shift: u32,
    ) -> Self {
        Self {
            frame_length: term.get_i32(offset + FRAME_LENGTH_OFFSET),
            version: term.get_u8(offset + VERSION_OFFSET),
            flags: term.get_u8(offset + FLAGS_OFFSET),
            frame_type: term.get_u16(offset + TYPE_OFFSET),
            term_offset: term.get_i32(offset + TERM_OFFSET_OFFSET),
            session_id: term.get_i32(offset + SESSION_ID_OFFSET),
            stream_id: term.get_i32(offset + STREAM_ID_OFFSET),
            term_id: term.get_i32(offset + TERM_ID_OFFSET),
            reserved_value: term.get_i64(offset + RESERVED_VALUE_OFFSET),
            initial_term_id,
            position_bits_to_shift,
        }
    }

    pub fn frame_length(&self) -> i32 {
        self.frame_length
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn frame_type(&self) -> u16 {
        self.frame_type
    }

    pub fn term_offset(&self) -> i32 {
        self.term_offset
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn term_id(&self) -> i32 {
        self.term_id
    }

    pub fn reserved_value(&self) -> i64 {
        self.reserved_value
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    /// Stream position just after this frame.
    pub fn position(&self) -> i64 {
        let end = self.term_offset as usize + align(self.frame_length as usize, FRAME_ALIGNMENT);
        compute_position(
            self.term_id,
            end as i64,
            self.position_bits_to_shift,
            self.initial_term_id,
        )
    }
}
