//! Appends frames to one term partition.
//!
//! Space is reserved with a fetch-and-add on the partition's tail counter.
//! A reservation that runs past the end of the term trips it: the appender
//! pads whatever space was left and reports [`AppendOutcome::Tripped`]. The
//! tail then stays beyond the term length until the publisher rotates.

use crate::frame::{
    BEGIN_FRAG_FLAG, END_FRAG_FLAG, FRAME_ALIGNMENT, FRAME_TYPE_DATA, FRAME_TYPE_PAD,
    HEADER_LENGTH, HeaderWriter, UNFRAGMENTED, frame_length_ordered, required_length,
};
use crate::layout::{raw_tail_offset, tail_counter_offset, term_id};
use crate::log_buffers::LogBuffers;
use strata_buffer::{AtomicBuffer, align};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Frames committed; `term_offset` is the tail just after them.
    Appended { term_id: i32, term_offset: usize },
    /// The reservation did not fit and the term is now complete.
    Tripped { term_id: i32 },
}

#[derive(Debug, Clone)]
pub struct TermAppender {
    term: AtomicBuffer,
    metadata: AtomicBuffer,
    tail_index: usize,
}

impl TermAppender {
    pub fn new(log: &LogBuffers, partition: usize) -> Self {
        Self {
            term: log.term_buffer(partition).clone(),
            metadata: log.metadata_buffer().clone(),
            tail_index: tail_counter_offset(partition),
        }
    }

    #[inline]
    pub fn raw_tail_volatile(&self) -> i64 {
        self.metadata.get_i64_volatile(self.tail_index)
    }

    /// Store a fresh tail for a term about to become active.
    pub fn reset_tail(&self, raw_tail: i64) {
        self.metadata.put_i64_ordered(self.tail_index, raw_tail);
    }

    /// Append `payload` as one frame, or as BEGIN..END fragments of at most
    /// `max_payload` bytes each.
    pub fn append(
        &self,
        header: &HeaderWriter,
        payload: &[u8],
        max_payload: usize,
    ) -> AppendOutcome {
        let required = required_length(payload.len(), max_payload);
        let raw_tail = self.metadata.get_and_add_i64(self.tail_index, required as i64);
        let term_id = term_id(raw_tail);
        let offset = raw_tail_offset(raw_tail) as usize;
        let term_length = self.term.capacity();

        let resulting = offset + required;
        if resulting > term_length {
            self.trip(header, offset, term_id);
            return AppendOutcome::Tripped { term_id };
        }

        if payload.len() <= max_payload {
            self.write_frame(header, offset, payload, UNFRAGMENTED, term_id);
        } else {
            let mut frame_offset = offset;
            let mut chunks = payload.chunks(max_payload).peekable();
            let mut flags = BEGIN_FRAG_FLAG;
            while let Some(chunk) = chunks.next() {
                if chunks.peek().is_none() {
                    flags |= END_FRAG_FLAG;
                }
                self.write_frame(header, frame_offset, chunk, flags, term_id);
                frame_offset += align(chunk.len() + HEADER_LENGTH, FRAME_ALIGNMENT);
                flags = 0;
            }
        }
        AppendOutcome::Appended {
            term_id,
            term_offset: resulting,
        }
    }

    fn write_frame(
        &self,
        header: &HeaderWriter,
        offset: usize,
        chunk: &[u8],
        flags: u8,
        term_id: i32,
    ) {
        header.write(&self.term, offset, flags, FRAME_TYPE_DATA, term_id);
        self.term.put_bytes(offset + HEADER_LENGTH, chunk);
        frame_length_ordered(&self.term, offset, (chunk.len() + HEADER_LENGTH) as i32);
    }

    fn trip(&self, header: &HeaderWriter, offset: usize, term_id: i32) {
        let term_length = self.term.capacity();
        if offset < term_length {
            let padding = term_length - offset;
            header.write(&self.term, offset, UNFRAGMENTED, FRAME_TYPE_PAD, term_id);
            frame_length_ordered(&self.term, offset, padding as i32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::frame::{Header, frame_length_volatile, frame_type};

    const TERM_LENGTH: usize = 1024;

    fn appender() -> (LogBuffers, TermAppender) {
        let log = LogBuffers::in_memory(&LogConfig::new(TERM_LENGTH)).unwrap();
        let appender = TermAppender::new(&log, 0);
        (log, appender)
    }

    #[test]
    fn frames_are_laid_out_back_to_back() {
        let (log, appender) = appender();
        let header = HeaderWriter::new(1, 2);
        assert_eq!(
            appender.append(&header, b"hello", 96),
            AppendOutcome::Appended { term_id: 0, term_offset: 64 }
        );
        assert_eq!(
            appender.append(&header, &[], 96),
            AppendOutcome::Appended { term_id: 0, term_offset: 96 }
        );

        let term = log.term_buffer(0);
        assert_eq!(frame_length_volatile(term, 0), 37);
        assert_eq!(term.bytes(HEADER_LENGTH, 5), b"hello");
        assert_eq!(frame_length_volatile(term, 64), 32);
        assert_eq!(Header::read(term, 64, 0, 10).flags(), UNFRAGMENTED);
    }

    #[test]
    fn large_payloads_are_fragmented() {
        let (log, appender) = appender();
        let payload: Vec<u8> = (0..200u8).collect();
        let outcome = appender.append(&HeaderWriter::new(0, 0), &payload, 96);
        assert_eq!(outcome, AppendOutcome::Appended { term_id: 0, term_offset: 320 });

        let term = log.term_buffer(0);
        let flags: Vec<u8> = [0, 128, 256]
            .iter()
            .map(|&offset| Header::read(term, offset, 0, 10).flags())
            .collect();
        assert_eq!(flags, vec![BEGIN_FRAG_FLAG, 0, END_FRAG_FLAG]);
        assert_eq!(frame_length_volatile(term, 256), 32 + 8);
        assert_eq!(term.bytes(256 + HEADER_LENGTH, 8), &payload[192..]);
    }

    #[test]
    fn overrunning_reservation_pads_the_rest_of_the_term() {
        let (log, appender) = appender();
        let header = HeaderWriter::new(0, 0);
        let payload = [7u8; 64];
        for _ in 0..10 {
            appender.append(&header, &payload, 96);
        }
        // 10 x 96 = 960; another 96 does not fit.
        assert_eq!(appender.append(&header, &payload, 96), AppendOutcome::Tripped { term_id: 0 });

        let term = log.term_buffer(0);
        assert_eq!(frame_length_volatile(term, 960), 64);
        assert_eq!(frame_type(term, 960), FRAME_TYPE_PAD);
        assert_eq!(raw_tail_offset(appender.raw_tail_volatile()), 1056);
    }

    #[test]
    fn tripping_a_full_term_writes_no_padding() {
        let (log, appender) = appender();
        let header = HeaderWriter::new(0, 0);
        for _ in 0..16 {
            appender.append(&header, &[1u8; 32], 96);
        }
        assert_eq!(appender.append(&header, &[1u8; 32], 96), AppendOutcome::Tripped { term_id: 0 });
        assert_eq!(frame_type(log.term_buffer(0), 960), FRAME_TYPE_DATA);
    }
}
