//! Platform primitive façade
//!
//! One conforming implementation per target platform. Everything above this
//! module (region, ring) sees only the platform-neutral types re-exported
//! here and never touches OS handles directly.

#[cfg(unix)]
mod posix;

#[cfg(unix)]
pub use posix::{unlink, unmap, Segment, SharedLock};

/// How a segment is mapped into the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

/// Outcome of a lock acquisition attempt.
///
/// Abandonment is an enumerated outcome of the specific acquisition it
/// describes, not a flag queried out of band: `AcquiredAbandoned` means the
/// lock was obtained *because* its previous holder terminated without
/// releasing it, so the protected bytes are of unknown consistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    AcquiredAbandoned,
    WouldBlock,
}
