use std::fmt;
use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, LogBufferError>;

/// Status code of a publication with no attached subscriber.
pub const NOT_CONNECTED: i64 = -1;
/// Status code of an offer refused because a subscriber is too far behind.
pub const BACK_PRESSURED: i64 = -2;
/// Status code of an offer that completed the active term; retry.
pub const ADMIN_ACTION: i64 = -3;
pub const PUBLICATION_CLOSED: i64 = -4;
pub const MAX_POSITION_EXCEEDED: i64 = -5;

/// Errors creating, mapping or attaching to a log.
#[derive(Debug, thiserror::Error)]
pub enum LogBufferError {
    #[error("failed to map log file '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("log file is {actual} bytes, its metadata requires {expected}")]
    Undersized { expected: usize, actual: usize },

    #[error("not a log file: magic 0x{0:016X}")]
    BadMagic(u64),

    #[error("unsupported log layout version {0}")]
    UnsupportedVersion(i32),

    #[error("term length {0} is not a power of two between 1 KiB and 1 GiB")]
    InvalidTermLength(i64),

    #[error("mtu {mtu} is not a multiple of 32 between the header and {term_length}")]
    InvalidMtu { mtu: i64, term_length: i64 },

    #[error("all {max} subscriber slots are in use")]
    SubscriberLimitReached { max: usize },
}

/// Why an offer did not append.
///
/// `BackPressured` and `AdminAction` are transient: retry the same offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OfferError {
    #[error("no subscriber is attached")]
    NotConnected,

    #[error("back pressured by a slow subscriber")]
    BackPressured,

    #[error("term rotation required, retry")]
    AdminAction,

    #[error("publication is closed")]
    Closed,

    #[error("maximum stream position exceeded")]
    MaxPositionExceeded,

    #[error("message of {length} bytes exceeds the maximum of {max}")]
    MessageTooLarge { length: usize, max: usize },
}

impl OfferError {
    /// Negative status code for this outcome. Argument errors have none.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::NotConnected => Some(NOT_CONNECTED),
            Self::BackPressured => Some(BACK_PRESSURED),
            Self::AdminAction => Some(ADMIN_ACTION),
            Self::Closed => Some(PUBLICATION_CLOSED),
            Self::MaxPositionExceeded => Some(MAX_POSITION_EXCEEDED),
            Self::MessageTooLarge { .. } => None,
        }
    }

    /// True when retrying the same offer can succeed.
    pub fn is_back_pressure(&self) -> bool {
        matches!(self, Self::BackPressured | Self::AdminAction)
    }
}

/// The inconsistency found in a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    FrameTooShort { frame_length: i32 },
    FrameExceedsTerm { frame_length: i32 },
    TermOffsetMismatch { found: i32 },
    TermIdMismatch { expected: i32, found: i32 },
    StreamMismatch { session_id: i32, stream_id: i32 },
    UnknownFrameType(u16),
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooShort { frame_length } => {
                write!(f, "frame length {frame_length} is shorter than a header")
            }
            Self::FrameExceedsTerm { frame_length } => {
                write!(f, "frame length {frame_length} overruns the term")
            }
            Self::TermOffsetMismatch { found } => {
                write!(f, "frame records term offset {found}")
            }
            Self::TermIdMismatch { expected, found } => {
                write!(f, "frame records term id {found}, expected {expected}")
            }
            Self::StreamMismatch {
                session_id,
                stream_id,
            } => write!(f, "frame belongs to session {session_id} stream {stream_id}"),
            Self::UnknownFrameType(frame_type) => write!(f, "unknown frame type {frame_type}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("subscription is closed")]
    Closed,

    /// Fragments before the bad frame were delivered; the subscription stays
    /// at the bad frame.
    #[error("data corruption at position {position}: {kind}")]
    DataCorruption { position: i64, kind: Corruption },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_errors_map_to_status_codes() {
        assert_eq!(OfferError::NotConnected.code(), Some(-1));
        assert_eq!(OfferError::BackPressured.code(), Some(-2));
        assert_eq!(OfferError::AdminAction.code(), Some(-3));
        assert_eq!(OfferError::Closed.code(), Some(-4));
        assert_eq!(OfferError::MaxPositionExceeded.code(), Some(-5));
        assert_eq!(OfferError::MessageTooLarge { length: 9, max: 8 }.code(), None);
    }

    #[test]
    fn only_transient_errors_are_back_pressure() {
        assert!(OfferError::BackPressured.is_back_pressure());
        assert!(OfferError::AdminAction.is_back_pressure());
        assert!(!OfferError::NotConnected.is_back_pressure());
        assert!(!OfferError::Closed.is_back_pressure());
    }

    #[test]
    fn corruption_is_reported_with_its_position() {
        let err = PollError::DataCorruption {
            position: 96,
            kind: Corruption::TermIdMismatch {
                expected: 4,
                found: 1,
            },
        };
        assert_eq!(
            err.to_string(),
            "data corruption at position 96: frame records term id 1, expected 4"
        );
    }
}
