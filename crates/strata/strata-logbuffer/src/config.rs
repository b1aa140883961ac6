use crate::error::{LogBufferError, Result};
use crate::frame::{FRAME_ALIGNMENT, HEADER_LENGTH};

pub const MIN_TERM_LENGTH: usize = 1024;
pub const MAX_TERM_LENGTH: usize = 1 << 30;
pub const DEFAULT_MTU: usize = 1408;
/// Upper bound on a single message regardless of term length.
pub const MAX_MESSAGE_LENGTH: usize = 16 * 1024 * 1024;

/// Shape of one log: term length, MTU and the stream identity stamped into
/// every frame header.
///
/// The term length must be a power of two so positions split into a term
/// count and an offset with a shift and a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub term_length: usize,
    pub mtu: usize,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
}

impl LogConfig {
    pub fn new(term_length: usize) -> Self {
        Self {
            term_length,
            mtu: default_mtu(term_length),
            initial_term_id: 0,
            session_id: 0,
            stream_id: 0,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn with_initial_term_id(mut self, initial_term_id: i32) -> Self {
        self.initial_term_id = initial_term_id;
        self
    }

    pub fn with_session_id(mut self, session_id: i32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_stream_id(mut self, stream_id: i32) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let term_length = self.term_length;
        if !term_length.is_power_of_two()
            || !(MIN_TERM_LENGTH..=MAX_TERM_LENGTH).contains(&term_length)
        {
            return Err(LogBufferError::InvalidTermLength(term_length as i64));
        }
        let mtu = self.mtu;
        if mtu % FRAME_ALIGNMENT != 0 || mtu <= HEADER_LENGTH || mtu > term_length {
            return Err(LogBufferError::InvalidMtu {
                mtu: mtu as i64,
                term_length: term_length as i64,
            });
        }
        Ok(())
    }

    /// Largest payload a single offer accepts.
    pub fn max_message_length(&self) -> usize {
        (self.term_length / 8).min(MAX_MESSAGE_LENGTH)
    }

    /// Largest payload carried by one frame; longer messages are fragmented.
    pub fn max_payload_length(&self) -> usize {
        self.mtu - HEADER_LENGTH
    }

    #[inline]
    pub fn position_bits_to_shift(&self) -> u32 {
        self.term_length.trailing_zeros()
    }
}

/// `min(1408, term_length / 8)`, kept a multiple of the frame alignment.
pub fn default_mtu(term_length: usize) -> usize {
    let mtu = DEFAULT_MTU.min(term_length / 8);
    mtu - mtu % FRAME_ALIGNMENT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_term_length() {
        let config = LogConfig::new(64 * 1024);
        assert_eq!(config.mtu, 1408);
        assert_eq!(config.max_message_length(), 8 * 1024);
        assert_eq!(config.max_payload_length(), 1376);
        assert_eq!(config.position_bits_to_shift(), 16);

        let small = LogConfig::new(1024);
        assert_eq!(small.mtu, 128);
        assert_eq!(small.max_message_length(), 128);
        assert!(small.validate().is_ok());
    }

    #[test]
    fn message_length_is_capped_for_huge_terms() {
        assert_eq!(LogConfig::new(MAX_TERM_LENGTH).max_message_length(), MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn rejects_bad_term_lengths() {
        for term_length in [0, 512, 1000, 3 * 1024, MAX_TERM_LENGTH * 2] {
            let config = LogConfig::new(1024).with_mtu(128);
            let config = LogConfig {
                term_length,
                ..config
            };
            assert!(
                matches!(config.validate(), Err(LogBufferError::InvalidTermLength(_))),
                "term length {term_length} accepted"
            );
        }
    }

    #[test]
    fn rejects_bad_mtus() {
        for mtu in [0, 32, 100, 2048] {
            let config = LogConfig::new(1024).with_mtu(mtu);
            assert!(
                matches!(config.validate(), Err(LogBufferError::InvalidMtu { .. })),
                "mtu {mtu} accepted"
            );
        }
        assert!(LogConfig::new(1024).with_mtu(1024).validate().is_ok());
    }
}
