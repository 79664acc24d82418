//! shmring - cross-process shared memory with a ring-buffer byte transport

pub mod error;
pub mod guard;
pub mod name;
pub mod platform;
pub mod region;
pub mod ring;

pub use error::{Error, Result};
pub use guard::{MemoryGuard, ShareLock};
pub use name::{SegmentName, MAX_NAME_LEN};
pub use platform::{AccessMode, AcquireOutcome};
pub use region::{CreateOutcome, SharedMemoryRegion};
pub use ring::{RingBufferController, HEADER_LEN};
