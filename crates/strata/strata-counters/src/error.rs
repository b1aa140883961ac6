use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, CountersError>;

#[derive(Debug, thiserror::Error)]
pub enum CountersError {
    #[error("failed to map counters file '{}'", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("counters file is {actual} bytes but its header declares {expected}")]
    Undersized { expected: usize, actual: usize },

    #[error("not a counters file: magic 0x{0:016X}")]
    BadMagic(u64),

    #[error("unsupported counters layout version {0}")]
    UnsupportedVersion(i32),

    #[error("counters header is corrupt: {0}")]
    CorruptHeader(&'static str),

    #[error("counter {0} is not allocated")]
    NotFound(i32),

    /// A record that cannot have been written by a well-behaved writer.
    #[error("counter {id} records label length {length}, max is {max}")]
    DataCorruption { id: i32, length: i32, max: usize },

    #[error("counters directory is full ({capacity} slots)")]
    DirectoryFull { capacity: usize },
}
