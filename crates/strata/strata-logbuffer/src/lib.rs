//! Term-rotating log buffers with a non-blocking publish and receive path.
//!
//! A log is three term-sized partitions followed by a metadata page. One
//! [`Publication`] appends frames to the active term; any number of
//! [`Subscription`]s poll them back in order. Neither side blocks: every
//! wait is a retry loop in the caller.
//!
//! ```text
//! ┌──────────┬──────────┬──────────┬──────────────┐
//! │ term 0   │ term 1   │ term 2   │ metadata     │
//! │ (T bytes)│ (T bytes)│ (T bytes)│ (4096 bytes) │
//! └──────────┴──────────┴──────────┴──────────────┘
//! ```

mod appender;
mod config;
mod error;
pub mod fragment;
pub mod frame;
pub mod layout;
mod log_buffers;
mod publication;
mod reader;
mod subscription;

pub use appender::{AppendOutcome, TermAppender};
pub use config::{LogConfig, MAX_TERM_LENGTH, MIN_TERM_LENGTH};
pub use error::{
    ADMIN_ACTION, BACK_PRESSURED, Corruption, LogBufferError, MAX_POSITION_EXCEEDED,
    NOT_CONNECTED, OfferError, PUBLICATION_CLOSED, PollError, Result,
};
pub use fragment::{FragmentAssembler, FragmentHandler};
pub use frame::{Header, HeaderWriter};
pub use log_buffers::LogBuffers;
pub use publication::Publication;
pub use reader::{ReadContext, TermRead, read_term};
pub use subscription::Subscription;
