use crate::error::{LogBufferError, PollError};
use crate::fragment::FragmentHandler;
use crate::layout::{compute_term_count, index_by_term_count};
use crate::log_buffers::LogBuffers;
use crate::reader::{ReadContext, read_term};
use std::sync::Arc;
use tracing::{debug, warn};

/// Non-blocking reader of one log.
///
/// Each subscription owns a slot in the log metadata where it publishes its
/// consumption position; the publisher reads those slots for backpressure.
/// A subscription starts at the publisher's position when it attaches.
pub struct Subscription {
    log: Arc<LogBuffers>,
    slot: Option<usize>,
    position: i64,
    term_length_mask: i64,
    position_bits_to_shift: u32,
    initial_term_id: i32,
    session_id: i32,
    stream_id: i32,
}

impl Subscription {
    pub fn new(log: Arc<LogBuffers>) -> Result<Self, LogBufferError> {
        let config = *log.config();
        // Claim with the position seen now, then move up to the position seen
        // once the slot is live: the publisher cannot clean anything at or
        // after the first position while the slot holds it.
        let slot = log.claim_subscriber_slot(log.producer_position())?;
        let position = log.producer_position();
        log.update_subscriber_position(slot, position);

        Ok(Self {
            slot: Some(slot),
            position,
            term_length_mask: config.term_length as i64 - 1,
            position_bits_to_shift: config.position_bits_to_shift(),
            initial_term_id: config.initial_term_id,
            session_id: config.session_id,
            stream_id: config.stream_id,
            log,
        })
    }

    /// Deliver up to `fragment_limit` fragments to `handler`, in order.
    ///
    /// Returns the number delivered, `Ok(0)` when nothing is ready. Rolls
    /// into the next term when the current one is exhausted.
    pub fn poll<H: FragmentHandler + ?Sized>(
        &mut self,
        handler: &mut H,
        fragment_limit: usize,
    ) -> Result<usize, PollError> {
        let slot = self.slot.ok_or(PollError::Closed)?;
        let start = self.position;
        let mut fragments = 0;

        let result = loop {
            let term_count = compute_term_count(self.position, self.position_bits_to_shift);
            let offset = (self.position & self.term_length_mask) as usize;
            let term = self.log.term_buffer(index_by_term_count(term_count));
            let context = ReadContext {
                term_id: self.initial_term_id.wrapping_add(term_count),
                session_id: self.session_id,
                stream_id: self.stream_id,
                initial_term_id: self.initial_term_id,
                position_bits_to_shift: self.position_bits_to_shift,
            };

            let read = read_term(term, offset, &context, fragment_limit - fragments, &mut *handler);
            fragments += read.fragments;
            self.position += (read.offset - offset) as i64;

            if let Some(kind) = read.corruption {
                warn!(
                    position = self.position,
                    stream_id = self.stream_id,
                    %kind,
                    "corrupt frame in log"
                );
                break Err(PollError::DataCorruption {
                    position: self.position,
                    kind,
                });
            }
            if read.offset < term.capacity() || fragments >= fragment_limit {
                break Ok(fragments);
            }
        };

        if self.position != start {
            self.log.update_subscriber_position(slot, self.position);
        }
        result
    }

    /// Stream position of the next fragment to deliver.
    pub fn position(&self) -> i64 {
        self.position
    }

    /// Release the metadata slot. Later polls return `Closed`.
    pub fn close(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.log.release_subscriber_slot(slot);
            debug!(stream_id = self.stream_id, position = self.position, "subscription closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.slot.is_none()
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn stream_id(&self) -> i32 {
        self.stream_id
    }

    pub fn log(&self) -> &Arc<LogBuffers> {
        &self.log
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogConfig;
    use crate::error::Corruption;
    use crate::frame::{Header, TERM_OFFSET_OFFSET};
    use crate::publication::Publication;
    use strata_buffer::AtomicBuffer;

    fn log(term_length: usize) -> Arc<LogBuffers> {
        Arc::new(LogBuffers::in_memory(&LogConfig::new(term_length).with_stream_id(10)).unwrap())
    }

    fn drain(subscription: &mut Subscription, limit: usize) -> Vec<Vec<u8>> {
        let mut seen = Vec::new();
        subscription
            .poll(
                &mut |buffer: &AtomicBuffer, offset: usize, length: usize, _header: &Header| {
                    seen.push(buffer.bytes(offset, length).to_vec())
                },
                limit,
            )
            .unwrap();
        seen
    }

    #[test]
    fn nothing_ready_polls_zero() {
        let log = log(1024);
        let mut subscription = Subscription::new(log).unwrap();
        let mut calls = 0;
        let polled = subscription
            .poll(&mut |_: &AtomicBuffer, _: usize, _: usize, _: &Header| calls += 1, 10)
            .unwrap();
        assert_eq!((polled, calls), (0, 0));
    }

    #[test]
    fn zero_length_message_is_one_empty_fragment() {
        let log = log(1024);
        let mut subscription = Subscription::new(Arc::clone(&log)).unwrap();
        let mut publication = Publication::new(log);
        assert_eq!(publication.offer(&[]), Ok(32));

        let mut lengths = Vec::new();
        let polled = subscription
            .poll(
                &mut |_: &AtomicBuffer, _: usize, length: usize, header: &Header| {
                    lengths.push((length, header.position()))
                },
                10,
            )
            .unwrap();
        assert_eq!(polled, 1);
        assert_eq!(lengths, vec![(0, 32)]);
        assert_eq!(subscription.position(), 32);
    }

    #[test]
    fn polling_rolls_over_into_the_next_term() {
        let log = log(1024);
        let mut subscription = Subscription::new(Arc::clone(&log)).unwrap();
        let mut publication = Publication::new(log);

        let mut offered = Vec::new();
        for i in 0..20u8 {
            let message = [i; 32];
            loop {
                match publication.offer(&message) {
                    Ok(_) => break,
                    Err(e) if e.is_back_pressure() => continue,
                    Err(e) => panic!("offer failed: {e}"),
                }
            }
            offered.push(message.to_vec());
        }

        assert_eq!(drain(&mut subscription, 100), offered);
        assert_eq!(subscription.position(), 1024 + 4 * 64);
    }

    #[test]
    fn subscription_joins_at_the_current_position() {
        let log = log(1024);
        let _early = Subscription::new(Arc::clone(&log)).unwrap();
        let mut publication = Publication::new(Arc::clone(&log));
        publication.offer(b"before").unwrap();

        let mut late = Subscription::new(log).unwrap();
        assert_eq!(late.position(), 64);
        publication.offer(b"after").unwrap();
        assert_eq!(drain(&mut late, 10), vec![b"after".to_vec()]);
    }

    #[test]
    fn progress_is_published_for_backpressure() {
        let log = log(1024);
        let mut subscription = Subscription::new(Arc::clone(&log)).unwrap();
        let mut publication = Publication::new(Arc::clone(&log));
        publication.offer(&[1u8; 40]).unwrap();
        assert_eq!(log.min_subscriber_position(), Some(0));
        drain(&mut subscription, 10);
        assert_eq!(log.min_subscriber_position(), Some(96));
    }

    #[test]
    fn corruption_stops_the_poll_at_the_bad_frame() {
        let log = log(1024);
        let mut subscription = Subscription::new(Arc::clone(&log)).unwrap();
        let mut publication = Publication::new(Arc::clone(&log));
        publication.offer(b"good").unwrap();
        publication.offer(b"bad").unwrap();
        log.term_buffer(0).put_i32(64 + TERM_OFFSET_OFFSET, 512);

        let mut seen = 0;
        let err = subscription
            .poll(&mut |_: &AtomicBuffer, _: usize, _: usize, _: &Header| seen += 1, 10)
            .unwrap_err();
        assert_eq!(seen, 1);
        assert_eq!(
            err,
            PollError::DataCorruption {
                position: 64,
                kind: Corruption::TermOffsetMismatch { found: 512 },
            }
        );
        assert_eq!(subscription.position(), 64);
    }

    #[test]
    fn close_releases_the_slot() {
        let log = log(1024);
        let mut subscription = Subscription::new(Arc::clone(&log)).unwrap();
        assert!(log.is_connected());
        assert!(!subscription.is_closed());
        subscription.close();
        subscription.close();
        assert!(!log.is_connected());
        assert!(subscription.is_closed());
        let result =
            subscription.poll(&mut |_: &AtomicBuffer, _: usize, _: usize, _: &Header| {}, 1);
        assert_eq!(result, Err(PollError::Closed));
    }

    #[test]
    fn dropping_detaches() {
        let log = log(1024);
        drop(Subscription::new(Arc::clone(&log)).unwrap());
        assert_eq!(log.subscriber_count(), 0);
    }
}
