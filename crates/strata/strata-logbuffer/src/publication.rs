//! Non-blocking publisher.
//!
//! # Offer
//!
//! 1. Refuse when closed, oversized or without subscribers
//! 2. If the active term was tripped by an earlier offer, rotate to the next
//!    term (store its tail, then bump the active term count)
//! 3. If the message would complete the term, first clean the partition the
//!    next term will use; that requires every subscriber to be done with
//!    the term it held before, otherwise `BackPressured`
//! 4. Reserve with a fetch-and-add on the tail, write, commit
//!
//! A reservation that overruns the term pads it and returns `AdminAction`;
//! the caller's retry lands in the next term.
//!
//! Only one `Publication` may append to a log at a time.

use crate::appender::{AppendOutcome, TermAppender};
use crate::error::OfferError;
use crate::frame::{HeaderWriter, required_length};
use crate::layout::{
    ACTIVE_TERM_COUNT_OFFSET, PARTITION_COUNT, compute_position, index_by_term_count, pack_tail,
    raw_tail_offset,
};
use crate::log_buffers::LogBuffers;
use std::sync::Arc;
use tracing::debug;

pub struct Publication {
    log: Arc<LogBuffers>,
    appenders: [TermAppender; PARTITION_COUNT],
    header: HeaderWriter,
    term_length: usize,
    position_bits_to_shift: u32,
    initial_term_id: i32,
    max_message_length: usize,
    max_payload_length: usize,
    /// Term count whose partition this publication has already cleaned.
    prepared_term_count: Option<i32>,
    closed: bool,
}

impl Publication {
    pub fn new(log: Arc<LogBuffers>) -> Self {
        let config = *log.config();
        let appenders = std::array::from_fn(|partition| TermAppender::new(&log, partition));
        Self {
            appenders,
            header: HeaderWriter::new(config.session_id, config.stream_id),
            term_length: config.term_length,
            position_bits_to_shift: config.position_bits_to_shift(),
            initial_term_id: config.initial_term_id,
            max_message_length: config.max_message_length(),
            max_payload_length: config.max_payload_length(),
            prepared_term_count: None,
            closed: false,
            log,
        }
    }

    /// Append `payload` and return the stream position after it.
    ///
    /// Never blocks. `BackPressured` and `AdminAction` mean "retry the same
    /// offer"; see [`OfferError::is_back_pressure`].
    pub fn offer(&mut self, payload: &[u8]) -> Result<i64, OfferError> {
        if self.closed {
            return Err(OfferError::Closed);
        }
        if payload.len() > self.max_message_length {
            return Err(OfferError::MessageTooLarge {
                length: payload.len(),
                max: self.max_message_length,
            });
        }
        if !self.log.is_connected() {
            return Err(OfferError::NotConnected);
        }

        let mut term_count = self.log.active_term_count();
        let mut raw_tail = self.appenders[index_by_term_count(term_count)].raw_tail_volatile();
        if raw_tail_offset(raw_tail) > self.term_length as i64 {
            term_count = self.rotate(term_count)?;
            raw_tail = self.appenders[index_by_term_count(term_count)].raw_tail_volatile();
        }

        let required = required_length(payload.len(), self.max_payload_length);
        if raw_tail_offset(raw_tail) as usize + required >= self.term_length {
            self.prepare_next_partition(term_count)?;
        }

        let appender = &self.appenders[index_by_term_count(term_count)];
        match appender.append(&self.header, payload, self.max_payload_length) {
            AppendOutcome::Appended {
                term_id,
                term_offset,
            } => Ok(compute_position(
                term_id,
                term_offset as i64,
                self.position_bits_to_shift,
                self.initial_term_id,
            )),
            AppendOutcome::Tripped { .. } => Err(OfferError::AdminAction),
        }
    }

    /// Make the next term active. The partition was cleaned before the
    /// current term could be tripped, unless another handle tripped it, in
    /// which case it is cleaned here.
    fn rotate(&mut self, term_count: i32) -> Result<i32, OfferError> {
        let next = term_count
            .checked_add(1)
            .ok_or(OfferError::MaxPositionExceeded)?;
        self.prepare_next_partition(term_count)?;

        let term_id = self.initial_term_id.wrapping_add(next);
        self.appenders[index_by_term_count(next)].reset_tail(pack_tail(term_id, 0));
        self.log
            .metadata_buffer()
            .put_i32_ordered(ACTIVE_TERM_COUNT_OFFSET, next);
        debug!(
            term_id,
            term_count = next,
            stream_id = self.stream_id(),
            "rotated to next term"
        );
        Ok(next)
    }

    fn prepare_next_partition(&mut self, term_count: i32) -> Result<(), OfferError> {
        let next = term_count
            .checked_add(1)
            .ok_or(OfferError::MaxPositionExceeded)?;
        if self.prepared_term_count == Some(next) {
            return Ok(());
        }

        // The partition still holds term `next - 3`; every subscriber must
        // have reached the start of term `next - 2`.
        let required = (next as i64 - 2) << self.position_bits_to_shift;
        match self.log.min_subscriber_position() {
            None => return Err(OfferError::NotConnected),
            Some(min) if min < required => return Err(OfferError::BackPressured),
            Some(_) => {}
        }

        self.log
            .term_buffer(index_by_term_count(next))
            .set_memory(0, self.term_length, 0);
        self.prepared_term_count = Some(next);
        Ok(())
    }

    /// Position the next offer will append at.
    pub fn position(&self) -> i64 {
        self.log.producer_position()
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.log.is_connected()
    }

    pub fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(stream_id = self.stream_id(), "publication closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn max_message_length(&self) -> usize {
        self.max_message_length
    }

    pub fn max_payload_length(&self) -> usize {
        self.max_payload_length
    }

    pub fn session_id(&self) -> i32 {
        self.log.config().session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.log.config().stream_id
    }

    pub fn term_buffer_length(&self) -> usize {
        self.term_length
    }

    pub fn initial_term_id(&self) -> i32 {
        self.initial_term_id
    }

    pub fn log(&self) -> &Arc<LogBuffers> {
        &self.log
    }
}

impl Drop for Publication {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::layout::term_id;

    fn connected(term_length: usize) -> (Arc<LogBuffers>, Publication) {
        let log = Arc::new(LogBuffers::in_memory(&LogConfig::new(term_length)).unwrap());
        log.claim_subscriber_slot(0).unwrap();
        let publication = Publication::new(Arc::clone(&log));
        (log, publication)
    }

    #[test]
    fn offers_return_the_position_after_the_message() {
        let (_log, mut publication) = connected(1024);
        assert_eq!(publication.offer(&[1u8; 32]), Ok(64));
        assert_eq!(publication.offer(&[]), Ok(96));
        assert_eq!(publication.position(), 96);
    }

    #[test]
    fn a_full_term_trips_then_rotates() {
        let (log, mut publication) = connected(1024);
        for i in 1..=16 {
            assert_eq!(publication.offer(&[0u8; 32]), Ok(i * 64));
        }
        assert_eq!(publication.offer(&[0u8; 32]), Err(OfferError::AdminAction));
        assert_eq!(publication.offer(&[0u8; 32]), Ok(1024 + 64));
        assert_eq!(log.active_term_count(), 1);
        assert_eq!(term_id(log.raw_tail_volatile(1)), 1);
    }

    #[test]
    fn refuses_without_subscribers() {
        let log = Arc::new(LogBuffers::in_memory(&LogConfig::new(1024)).unwrap());
        let mut publication = Publication::new(log);
        assert!(!publication.is_connected());
        assert_eq!(publication.offer(b"x"), Err(OfferError::NotConnected));
    }

    #[test]
    fn oversized_messages_are_rejected() {
        let (_log, mut publication) = connected(1024);
        let max = publication.max_message_length();
        assert_eq!(max, 128);
        assert!(publication.offer(&vec![0u8; max]).is_ok());
        assert_eq!(
            publication.offer(&vec![0u8; max + 1]),
            Err(OfferError::MessageTooLarge { length: 129, max: 128 })
        );
    }

    #[test]
    fn close_is_idempotent() {
        let (_log, mut publication) = connected(1024);
        publication.close();
        publication.close();
        assert!(publication.is_closed());
        assert_eq!(publication.offer(b"late"), Err(OfferError::Closed));
    }

    #[test]
    fn slow_subscriber_back_pressures_the_third_rotation() {
        let (log, mut publication) = connected(1024);
        // Terms 0 and 1 complete freely; completing term 2 needs the
        // partition of term 0 back, which the subscriber at 0 still holds.
        let mut results = Vec::new();
        for _ in 0..60 {
            match publication.offer(&[0u8; 96]) {
                Err(OfferError::BackPressured) => break,
                other => results.push(other),
            }
        }
        assert_eq!(log.active_term_count(), 2);
        assert_eq!(publication.position(), 2 * 1024 + 7 * 128);
        assert_eq!(publication.offer(&[0u8; 96]), Err(OfferError::BackPressured));

        log.update_subscriber_position(0, 1024);
        assert_eq!(publication.offer(&[0u8; 96]), Ok(3 * 1024));
        let trips = results
            .iter()
            .filter(|r| **r == Err(OfferError::AdminAction))
            .count();
        assert_eq!((results.len(), trips), (25, 2));
    }
}
