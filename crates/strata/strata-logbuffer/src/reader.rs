use crate::error::Corruption;
use crate::fragment::FragmentHandler;
use crate::frame::{
    FRAME_ALIGNMENT, FRAME_TYPE_DATA, FRAME_TYPE_PAD, HEADER_LENGTH, Header,
    frame_length_volatile,
};
use strata_buffer::{AtomicBuffer, align};

/// What a reader expects every frame in the term to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadContext {
    pub term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub initial_term_id: i32,
    pub position_bits_to_shift: u32,
}

/// Result of one pass over a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermRead {
    /// Offset just past the last consumed frame.
    pub offset: usize,
    pub fragments: usize,
    /// Set when reading stopped at an inconsistent frame, found at `offset`.
    pub corruption: Option<Corruption>,
}

/// Deliver committed data frames from `offset` onwards.
///
/// Stops at the first uncommitted frame, at the end of the term, after
/// `fragment_limit` data frames, or at the first frame whose header does not
/// match the context. Padding frames are consumed without being delivered.
pub fn read_term<H: FragmentHandler + ?Sized>(
    term: &AtomicBuffer,
    mut offset: usize,
    context: &ReadContext,
    fragment_limit: usize,
    handler: &mut H,
) -> TermRead {
    let term_length = term.capacity();
    let mut fragments = 0;
    let mut corruption = None;

    while fragments < fragment_limit && offset < term_length {
        let frame_length = frame_length_volatile(term, offset);
        if frame_length == 0 {
            break;
        }
        let header = Header::read(
            term,
            offset,
            context.initial_term_id,
            context.position_bits_to_shift,
        );
        if let Err(kind) = check_frame(&header, frame_length, offset, term_length, context) {
            corruption = Some(kind);
            break;
        }

        let aligned = align(frame_length as usize, FRAME_ALIGNMENT);
        if header.frame_type() == FRAME_TYPE_DATA {
            let length = frame_length as usize - HEADER_LENGTH;
            handler.on_fragment(term, offset + HEADER_LENGTH, length, &header);
            fragments += 1;
        }
        offset += aligned;
    }

    TermRead {
        offset,
        fragments,
        corruption,
    }
}

fn check_frame(
    header: &Header,
    frame_length: i32,
    offset: usize,
    term_length: usize,
    context: &ReadContext,
) -> Result<(), Corruption> {
    if frame_length < HEADER_LENGTH as i32 {
        return Err(Corruption::FrameTooShort { frame_length });
    }
    if offset + align(frame_length as usize, FRAME_ALIGNMENT) > term_length {
        return Err(Corruption::FrameExceedsTerm { frame_length });
    }
    if header.term_offset() as i64 != offset as i64 {
        return Err(Corruption::TermOffsetMismatch {
            found: header.term_offset(),
        });
    }
    if header.term_id() != context.term_id {
        return Err(Corruption::TermIdMismatch {
            expected: context.term_id,
            found: header.term_id(),
        });
    }
    if header.session_id() != context.session_id || header.stream_id() != context.stream_id {
        return Err(Corruption::StreamMismatch {
            session_id: header.session_id(),
            stream_id: header.stream_id(),
        });
    }
    match header.frame_type() {
        FRAME_TYPE_DATA | FRAME_TYPE_PAD => Ok(()),
        other => Err(Corruption::UnknownFrameType(other)),
    }
}
