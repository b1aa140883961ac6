use std::sync::Arc;
use strata_buffer::AtomicBuffer;
use strata_counters::{CountersWriter, DirectoryLayout};
use strata_logbuffer::{Header, LogBuffers, LogConfig, OfferError, Publication, Subscription};

// ─── Helpers ────────────────────────────────────────────────────────────────

pub fn temp_shm_path(label: &str) -> String {
    let pid = std::process::id();
    format!("/tmp/strata_bench_{label}_{pid}")
}

/// Payload of `length` bytes with a sequence number in its first eight.
pub fn make_payload(seq: u64, length: usize) -> Vec<u8> {
    let mut payload = vec![(seq % 251) as u8; length.max(8)];
    payload[..8].copy_from_slice(&seq.to_le_bytes());
    payload
}

/// One connected publication and subscription over an in-memory log.
pub struct Pair {
    pub log: Arc<LogBuffers>,
    pub publication: Publication,
    pub subscription: Subscription,
}

impl Pair {
    pub fn in_memory(term_length: usize) -> Self {
        let log = Arc::new(
            LogBuffers::in_memory(&LogConfig::new(term_length).with_stream_id(1))
                .expect("failed to create log"),
        );
        Self::over(log)
    }

    pub fn mapped(path: &str, term_length: usize) -> Self {
        let log = Arc::new(
            LogBuffers::create(path, &LogConfig::new(term_length).with_stream_id(1))
                .expect("failed to create log file"),
        );
        Self::over(log)
    }

    fn over(log: Arc<LogBuffers>) -> Self {
        let subscription = Subscription::new(Arc::clone(&log)).expect("failed to subscribe");
        let publication = Publication::new(Arc::clone(&log));
        Self {
            log,
            publication,
            subscription,
        }
    }

    /// Offer `payload`, draining the subscription whenever it holds the
    /// publisher back.
    pub fn offer_draining(&mut self, payload: &[u8]) -> i64 {
        loop {
            match self.publication.offer(payload) {
                Ok(position) => return position,
                Err(OfferError::BackPressured) => {
                    self.drain();
                }
                Err(OfferError::AdminAction) => {}
                Err(e) => panic!("offer failed: {e}"),
            }
        }
    }

    /// Poll until nothing is left, returning the fragment count.
    pub fn drain(&mut self) -> usize {
        let mut total = 0;
        let mut sink = |_: &AtomicBuffer, _: usize, _: usize, _: &Header| {};
        loop {
            let polled = self.subscription.poll(&mut sink, 256).expect("poll failed");
            if polled == 0 {
                return total;
            }
            total += polled;
        }
    }
}

/// A counters directory with `count` labelled counters, each set to its id.
pub fn populated_counters(path: &str, count: usize) -> CountersWriter {
    // Spare slots for counters a bench allocates itself.
    let mut writer = CountersWriter::create(path, DirectoryLayout::for_capacity(count + 16))
        .expect("failed to create counters");
    for i in 0..count {
        let counter = writer
            .allocate(1, &format!("bench counter {i}"))
            .expect("failed to allocate counter");
        counter.set(counter.id() as i64);
    }
    writer
}
