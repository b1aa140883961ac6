//! Shared counters directory.
//!
//! A counters directory is a file of fixed-size records that a writer (the
//! driver) fills with named 64-bit values. Monitoring tools map it read-only
//! and [`scan`](CountersReader::scan) it without any coordination with the
//! writer.

mod directory;
mod error;
pub mod layout;
mod reader;
mod writer;

pub use directory::CountersDirectory;
pub use error::{CountersError, Result};
pub use layout::{CounterState, DirectoryLayout};
pub use reader::{Counter, CounterVisitor, CountersReader};
pub use writer::{AtomicCounter, CountersWriter};
