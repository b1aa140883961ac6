use crate::config::{LogConfig, MIN_TERM_LENGTH};
use crate::error::{LogBufferError, Result};
use crate::layout::{
    ACTIVE_TERM_COUNT_OFFSET, INITIAL_TERM_ID_OFFSET, LOG_MAGIC, LOG_META_DATA_LENGTH,
    LOG_VERSION, MAGIC_OFFSET, MAX_SUBSCRIBERS, MTU_OFFSET, PARTITION_COUNT, SESSION_ID_OFFSET,
    SLOT_ACTIVE, SLOT_CLAIMING, SLOT_FREE, SLOT_POSITION_OFFSET, SLOT_STATE_OFFSET,
    STREAM_ID_OFFSET, SUBSCRIBER_COUNT_OFFSET, TERM_LENGTH_OFFSET, VERSION_OFFSET,
    compute_position, index_by_term_count, log_length, pack_tail, subscriber_slot_offset,
    tail_counter_offset, term_id, term_offset,
};
use std::path::Path;
use std::sync::Arc;
use strata_buffer::{AtomicBuffer, HeapRegion, Region};
use strata_mmap::MmapFileMut;
use tracing::debug;

/// The three term partitions and metadata page of one log.
///
/// Shared by a [`Publication`](crate::Publication) and its
/// [`Subscription`](crate::Subscription)s through an `Arc`; the backing
/// region lives as long as any view of it.
#[derive(Debug)]
pub struct LogBuffers {
    terms: [AtomicBuffer; PARTITION_COUNT],
    metadata: AtomicBuffer,
    config: LogConfig,
}

impl LogBuffers {
    /// Create and initialise a log file at `path`, truncating any old one.
    pub fn create<P: AsRef<Path>>(path: P, config: &LogConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();
        let file = MmapFileMut::create_rw(path, log_length(config.term_length) as u64)
            .map_err(|source| LogBufferError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(
            path = %path.display(),
            term_length = config.term_length,
            stream_id = config.stream_id,
            "created log"
        );
        Ok(Self::initialise(Arc::new(file), config))
    }

    /// An initialised log on the heap, for a publisher and subscribers in one
    /// process.
    pub fn in_memory(config: &LogConfig) -> Result<Self> {
        config.validate()?;
        let region = HeapRegion::zeroed(log_length(config.term_length));
        Ok(Self::initialise(Arc::new(region), config))
    }

    /// Map a log another process created.
    pub fn map_existing<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = MmapFileMut::open_rw(path).map_err(|source| LogBufferError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let log = Self::from_region(Arc::new(file))?;
        debug!(
            path = %path.display(),
            term_length = log.config.term_length,
            stream_id = log.config.stream_id,
            "mapped log"
        );
        Ok(log)
    }

    /// Validate an already initialised region and build views over it.
    pub fn from_region(region: Arc<dyn Region>) -> Result<Self> {
        let buffer = AtomicBuffer::new(region);
        let actual = buffer.capacity();
        let smallest = log_length(MIN_TERM_LENGTH);
        if actual < smallest {
            return Err(LogBufferError::Undersized {
                expected: smallest,
                actual,
            });
        }

        let metadata = buffer.view(actual - LOG_META_DATA_LENGTH, LOG_META_DATA_LENGTH);
        let magic = metadata.get_i64_volatile(MAGIC_OFFSET) as u64;
        if magic != LOG_MAGIC {
            return Err(LogBufferError::BadMagic(magic));
        }
        let version = metadata.get_i32(VERSION_OFFSET);
        if version != LOG_VERSION {
            return Err(LogBufferError::UnsupportedVersion(version));
        }

        let term_length = metadata.get_i32(TERM_LENGTH_OFFSET);
        let term_length = usize::try_from(term_length)
            .map_err(|_| LogBufferError::InvalidTermLength(term_length as i64))?;
        let mtu = metadata.get_i32(MTU_OFFSET);
        let mtu = usize::try_from(mtu).map_err(|_| LogBufferError::InvalidMtu {
            mtu: mtu as i64,
            term_length: term_length as i64,
        })?;
        let config = LogConfig {
            term_length,
            mtu,
            initial_term_id: metadata.get_i32(INITIAL_TERM_ID_OFFSET),
            session_id: metadata.get_i32(SESSION_ID_OFFSET),
            stream_id: metadata.get_i32(STREAM_ID_OFFSET),
        };
        config.validate()?;
        if log_length(term_length) != actual {
            return Err(LogBufferError::Undersized {
                expected: log_length(term_length),
                actual,
            });
        }
        Ok(Self::from_parts(&buffer, metadata, config))
    }

    fn initialise(region: Arc<dyn Region>, config: &LogConfig) -> Self {
        let buffer = AtomicBuffer::new(region);
        let metadata = buffer.view(PARTITION_COUNT * config.term_length, LOG_META_DATA_LENGTH);

        let initial = config.initial_term_id;
        metadata.put_i64(tail_counter_offset(0), pack_tail(initial, 0));
        for partition in 1..PARTITION_COUNT {
            // Earlier terms, as if the log had already rotated through them.
            let term_id = initial
                .wrapping_add(partition as i32)
                .wrapping_sub(PARTITION_COUNT as i32);
            metadata.put_i64(tail_counter_offset(partition), pack_tail(term_id, 0));
        }
        metadata.put_i32(ACTIVE_TERM_COUNT_OFFSET, 0);

        metadata.put_i32(VERSION_OFFSET, LOG_VERSION);
        metadata.put_i32(INITIAL_TERM_ID_OFFSET, initial);
        metadata.put_i32(TERM_LENGTH_OFFSET, config.term_length as i32);
        metadata.put_i32(MTU_OFFSET, config.mtu as i32);
        metadata.put_i32(SESSION_ID_OFFSET, config.session_id);
        metadata.put_i32(STREAM_ID_OFFSET, config.stream_id);
        metadata.put_i64_ordered(MAGIC_OFFSET, LOG_MAGIC as i64);

        Self::from_parts(&buffer, metadata, *config)
    }

    fn from_parts(buffer: &AtomicBuffer, metadata: AtomicBuffer, config: LogConfig) -> Self {
        let length = config.term_length;
        let terms = std::array::from_fn(|partition| buffer.view(partition * length, length));
        Self {
            terms,
            metadata,
            config,
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn term_length(&self) -> usize {
        self.config.term_length
    }

    pub fn term_buffer(&self, partition: usize) -> &AtomicBuffer {
        &self.terms[partition]
    }

    pub fn metadata_buffer(&self) -> &AtomicBuffer {
        &self.metadata
    }

    #[inline]
    pub fn active_term_count(&self) -> i32 {
        self.metadata.get_i32_volatile(ACTIVE_TERM_COUNT_OFFSET)
    }

    #[inline]
    pub fn raw_tail_volatile(&self, partition: usize) -> i64 {
        self.metadata.get_i64_volatile(tail_counter_offset(partition))
    }

    /// Position the publisher will append at next.
    pub fn producer_position(&self) -> i64 {
        let term_count = self.active_term_count();
        let raw_tail = self.raw_tail_volatile(index_by_term_count(term_count));
        compute_position(
            term_id(raw_tail),
            term_offset(raw_tail, self.config.term_length),
            self.config.position_bits_to_shift(),
            self.config.initial_term_id,
        )
    }

    /// Claim a subscriber slot starting at `position`.
    ///
    /// The position is published before the slot turns active, so a
    /// publisher never sees an active slot with a stale position.
    pub fn claim_subscriber_slot(&self, position: i64) -> Result<usize> {
        for slot in 0..MAX_SUBSCRIBERS {
            let base = subscriber_slot_offset(slot);
            if self
                .metadata
                .compare_and_set_i32(base + SLOT_STATE_OFFSET, SLOT_FREE, SLOT_CLAIMING)
            {
                self.metadata
                    .put_i64_ordered(base + SLOT_POSITION_OFFSET, position);
                self.metadata
                    .put_i32_ordered(base + SLOT_STATE_OFFSET, SLOT_ACTIVE);
                self.metadata.get_and_add_i32(SUBSCRIBER_COUNT_OFFSET, 1);
                debug!(slot, position, stream_id = self.config.stream_id, "subscriber attached");
                return Ok(slot);
            }
        }
        Err(LogBufferError::SubscriberLimitReached {
            max: MAX_SUBSCRIBERS,
        })
    }

    pub fn release_subscriber_slot(&self, slot: usize) {
        let base = subscriber_slot_offset(slot);
        if self
            .metadata
            .compare_and_set_i32(base + SLOT_STATE_OFFSET, SLOT_ACTIVE, SLOT_FREE)
        {
            self.metadata.get_and_add_i32(SUBSCRIBER_COUNT_OFFSET, -1);
            debug!(slot, stream_id = self.config.stream_id, "subscriber detached");
        }
    }

    #[inline]
    pub fn update_subscriber_position(&self, slot: usize, position: i64) {
        self.metadata
            .put_i64_ordered(subscriber_slot_offset(slot) + SLOT_POSITION_OFFSET, position);
    }

    pub fn subscriber_count(&self) -> i32 {
        self.metadata.get_i32_volatile(SUBSCRIBER_COUNT_OFFSET)
    }

    pub fn is_connected(&self) -> bool {
        self.subscriber_count() > 0
    }

    /// Lowest position over active subscribers, `None` with none attached.
    pub fn min_subscriber_position(&self) -> Option<i64> {
        (0..MAX_SUBSCRIBERS)
            .map(subscriber_slot_offset)
            .filter(|&base| self.metadata.get_i32_volatile(base + SLOT_STATE_OFFSET) == SLOT_ACTIVE)
            .map(|base| self.metadata.get_i64_volatile(base + SLOT_POSITION_OFFSET))
            .min()
    }
}
