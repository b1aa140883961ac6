//! Fragment callbacks and reassembly.

use crate::frame::{BEGIN_FRAG_FLAG, END_FRAG_FLAG, Header, UNFRAGMENTED};
use std::sync::Arc;
use strata_buffer::{AtomicBuffer, HeapRegion};

/// Receives each data fragment a poll delivers.
///
/// `buffer[offset..offset + length]` is the payload. It is only valid for the
/// duration of the call; copy out anything that must outlive it.
pub trait FragmentHandler {
    fn on_fragment(&mut self, buffer: &AtomicBuffer, offset: usize, length: usize, header: &Header);
}

impl<F> FragmentHandler for F
where
    F: FnMut(&AtomicBuffer, usize, usize, &Header),
{
    #[inline]
    fn on_fragment(
        &mut self,
        buffer: &AtomicBuffer,
        offset: usize,
        length: usize,
        header: &Header,
    ) {
        self(buffer, offset, length, header)
    }
}

const INITIAL_BUILDER_CAPACITY: usize = 4096;

/// Rebuilds messages split into BEGIN..END fragments and hands whole
/// messages to `delegate`. Unfragmented messages pass straight through.
///
/// Fragments that arrive without a BEGIN are dropped.
pub struct FragmentAssembler<H> {
    delegate: H,
    builder: AtomicBuffer,
    limit: usize,
    in_progress: bool,
}

impl<H: FragmentHandler> FragmentAssembler<H> {
    pub fn new(delegate: H) -> Self {
        Self {
            delegate,
            builder: AtomicBuffer::new(Arc::new(HeapRegion::zeroed(INITIAL_BUILDER_CAPACITY))),
            limit: 0,
            in_progress: false,
        }
    }

    pub fn delegate(&self) -> &H {
        &self.delegate
    }

    pub fn delegate_mut(&mut self) -> &mut H {
        &mut self.delegate
    }

    pub fn into_inner(self) -> H {
        self.delegate
    }

    fn append(&mut self, buffer: &AtomicBuffer, offset: usize, length: usize) {
        let required = self.limit + length;
        if required > self.builder.capacity() {
            let capacity = required.next_power_of_two();
            let grown = AtomicBuffer::new(Arc::new(HeapRegion::zeroed(capacity)));
            grown.put_buffer(0, &self.builder, 0, self.limit);
            self.builder = grown;
        }
        self.builder.put_buffer(self.limit, buffer, offset, length);
        self.limit = required;
    }
}

impl<H: FragmentHandler> FragmentHandler for FragmentAssembler<H> {
    fn on_fragment(
        &mut self,
        buffer: &AtomicBuffer,
        offset: usize,
        length: usize,
        header: &Header,
    ) {
        let flags = header.flags();
        if flags & UNFRAGMENTED == UNFRAGMENTED {
            self.delegate.on_fragment(buffer, offset, length, header);
            return;
        }

        if flags & BEGIN_FRAG_FLAG != 0 {
            self.limit = 0;
            self.in_progress = true;
        } else if !self.in_progress {
            return;
        }

        self.append(buffer, offset, length);
        if flags & END_FRAG_FLAG != 0 {
            self.in_progress = false;
            self.delegate.on_fragment(&self.builder, 0, self.limit, header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FRAME_TYPE_DATA, HEADER_LENGTH, HeaderWriter, frame_length_ordered};

    /// Writes one frame at offset 0 of its own term and returns its header.
    fn fragment(payload: &[u8], flags: u8) -> (AtomicBuffer, Header) {
        let term = AtomicBuffer::new(Arc::new(HeapRegion::zeroed(8192)));
        HeaderWriter::new(0, 0).write(&term, 0, flags, FRAME_TYPE_DATA, 0);
        term.put_bytes(HEADER_LENGTH, payload);
        frame_length_ordered(&term, 0, (payload.len() + HEADER_LENGTH) as i32);
        let header = Header::read(&term, 0, 0, 16);
        (term, header)
    }

    #[derive(Default)]
    struct Recorder {
        messages: Vec<Vec<u8>>,
    }

    impl FragmentHandler for Recorder {
        fn on_fragment(
            &mut self,
            buffer: &AtomicBuffer,
            offset: usize,
            length: usize,
            _header: &Header,
        ) {
            self.messages.push(buffer.bytes(offset, length).to_vec());
        }
    }

    fn deliver(assembler: &mut FragmentAssembler<Recorder>, payload: &[u8], flags: u8) {
        let (term, header) = fragment(payload, flags);
        assembler.on_fragment(&term, HEADER_LENGTH, payload.len(), &header);
    }

    #[test]
    fn unfragmented_messages_pass_through() {
        let mut assembler = FragmentAssembler::new(Recorder::default());
        deliver(&mut assembler, b"whole", UNFRAGMENTED);
        assert_eq!(assembler.delegate().messages, vec![b"whole".to_vec()]);
    }

    #[test]
    fn fragments_are_joined_in_order() {
        let mut assembler = FragmentAssembler::new(Recorder::default());
        deliver(&mut assembler, b"ab", BEGIN_FRAG_FLAG);
        deliver(&mut assembler, b"cd", 0);
        assert!(assembler.delegate().messages.is_empty());
        deliver(&mut assembler, b"ef", END_FRAG_FLAG);
        assert_eq!(assembler.into_inner().messages, vec![b"abcdef".to_vec()]);
    }

    #[test]
    fn builder_grows_past_its_initial_capacity() {
        let mut assembler = FragmentAssembler::new(Recorder::default());
        let chunk = vec![3u8; 3000];
        deliver(&mut assembler, &chunk, BEGIN_FRAG_FLAG);
        deliver(&mut assembler, &chunk, 0);
        deliver(&mut assembler, &chunk, END_FRAG_FLAG);
        let messages = assembler.into_inner().messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], vec![3u8; 9000]);
    }

    #[test]
    fn fragments_without_a_begin_are_dropped() {
        let mut assembler = FragmentAssembler::new(Recorder::default());
        deliver(&mut assembler, b"tail", 0);
        deliver(&mut assembler, b"end", END_FRAG_FLAG);
        deliver(&mut assembler, b"next", UNFRAGMENTED);
        assert_eq!(assembler.delegate().messages, vec![b"next".to_vec()]);
    }
}
