//! Error types for shmring

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid segment name: {0}")]
    InvalidName(String),

    #[error("failed to create segment `{name}`: {source}")]
    CreateFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("failed to open segment `{name}`: {source}")]
    OpenFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("failed to unlink segment `{name}`: {source}")]
    UnlinkFailed {
        name: String,
        source: std::io::Error,
    },

    #[error("failed to map segment: {0}")]
    MapFailed(std::io::Error),

    #[error("segment is already mapped; unmap first")]
    AlreadyMapped,

    #[error("region is not ready: no segment has been created or opened")]
    NotReady,

    #[error("region is not mapped")]
    NotMapped,

    #[error("access denied: mapping is read-only")]
    ReadOnly,

    #[error("lock operation failed: {0}")]
    Lock(std::io::Error),

    #[error("insufficient space: requested {requested}, available {available}")]
    InsufficientSpace { requested: u32, available: u32 },

    #[error("mapped size {0} is too small to hold the ring header")]
    RegionTooSmall(usize),

    #[error("ring header is missing or corrupt")]
    InvalidHeader,

    #[error("ring header version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("ring capacity mismatch: header says {stored}, mapping implies {expected}")]
    CapacityMismatch { stored: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;
