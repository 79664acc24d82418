//! Bounded circular byte stream over a shared memory region
//!
//! Layout of the mapped segment:
//!
//! ```text
//! offset  0: magic      u32
//! offset  4: version    u32
//! offset  8: capacity   u32   bytes in the circular area
//! offset 12: write_off  u32   next write position, in [0, capacity)
//! offset 16: read_off   u32   next read position, in [0, capacity)
//! offset 20: used       u32   valid unread bytes
//! offset 24: circular data area
//! ```
//!
//! Field order and width are a cross-process contract; fields are encoded and
//! decoded explicitly rather than cast in place. Native byte order: both ends
//! run on the same machine. `used` is tracked explicitly so that
//! `write_off == read_off` is never ambiguous between empty and full.

use std::io;

use log::debug;

use crate::guard::ShareLock;
use crate::platform::AccessMode;
use crate::region::SharedMemoryRegion;
use crate::{Error, Result};

const MAGIC: u32 = 0x5249_4E47; // "RING"
const VERSION: u32 = 1;

const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_CAPACITY: usize = 8;
const OFF_WRITE: usize = 12;
const OFF_READ: usize = 16;
const OFF_USED: usize = 20;

/// Bytes reserved for the control header at the start of the mapping.
pub const HEADER_LEN: usize = 24;

fn load_u32(base: *const u8, offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    unsafe { std::ptr::copy_nonoverlapping(base.add(offset), bytes.as_mut_ptr(), 4) };
    u32::from_ne_bytes(bytes)
}

fn store_u32(base: *mut u8, offset: usize, value: u32) {
    let bytes = value.to_ne_bytes();
    unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), base.add(offset), 4) };
}

/// Decoded control header. Mutations go through a load/modify/store cycle
/// under the lock; the store happens only after payload copies complete, so a
/// partial write never advances the cursors.
#[derive(Debug, Clone, Copy)]
struct RingHeader {
    capacity: u32,
    write_off: u32,
    read_off: u32,
    used: u32,
}

impl RingHeader {
    fn load(base: *const u8) -> Self {
        Self {
            capacity: load_u32(base, OFF_CAPACITY),
            write_off: load_u32(base, OFF_WRITE),
            read_off: load_u32(base, OFF_READ),
            used: load_u32(base, OFF_USED),
        }
    }

    fn store(&self, base: *mut u8) {
        store_u32(base, OFF_CAPACITY, self.capacity);
        store_u32(base, OFF_WRITE, self.write_off);
        store_u32(base, OFF_READ, self.read_off);
        store_u32(base, OFF_USED, self.used);
    }
}

/// A raw byte-stream ring buffer layered over its own [`SharedMemoryRegion`].
///
/// No message framing is imposed: writes append bytes, reads drain them. All
/// ring operations require the caller to hold the region's lock for their
/// full duration; the controller does not serialize them itself. Use
/// [`MemoryGuard`](crate::MemoryGuard) for scoped locking.
#[derive(Debug)]
pub struct RingBufferController {
    region: SharedMemoryRegion,
    header_written: bool,
}

impl RingBufferController {
    /// Create the named segment (or attach, on a benign creation race) and
    /// its paired lock. Query [`created_new`](Self::created_new) to learn
    /// which happened. The header is laid down on the creator's first map.
    pub fn create(name: &str, size: usize, open_if_created: bool) -> Result<Self> {
        let region = SharedMemoryRegion::create(name, size, open_if_created)?;
        Ok(Self {
            region,
            header_written: false,
        })
    }

    /// Attach to an existing ring buffer. Never creates.
    pub fn open(name: &str) -> Result<Self> {
        let region = SharedMemoryRegion::open(name)?;
        Ok(Self {
            region,
            header_written: false,
        })
    }

    /// True iff `create` allocated the underlying segment.
    pub fn created_new(&self) -> bool {
        self.region.created_new()
    }

    pub fn is_mapped(&self) -> bool {
        self.region.is_mapped()
    }

    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// Map the segment and establish the header view. The creator's first
    /// map initializes an empty header with `capacity = mapped − HEADER_LEN`;
    /// every other map validates the header already present and fails on a
    /// magic, version or capacity mismatch rather than silently adapting.
    pub fn map(&mut self, mode: AccessMode, size: usize) -> Result<()> {
        self.region.map(mode, size)?;
        if let Err(err) = self.attach() {
            let _ = self.region.unmap();
            return Err(err);
        }
        Ok(())
    }

    fn attach(&mut self) -> Result<()> {
        let len = self.region.data_size();
        if len < HEADER_LEN + 1 {
            return Err(Error::RegionTooSmall(len));
        }
        // The header addresses the circular area with u32 offsets.
        let capacity = u32::try_from(len - HEADER_LEN).map_err(|_| {
            Error::MapFailed(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("circular area of {} bytes exceeds u32 range", len - HEADER_LEN),
            ))
        })?;

        if self.region.created_new() && !self.header_written {
            let (base, _) = self.region.writable_base()?;
            store_u32(base, OFF_MAGIC, MAGIC);
            store_u32(base, OFF_VERSION, VERSION);
            RingHeader {
                capacity,
                write_off: 0,
                read_off: 0,
                used: 0,
            }
            .store(base);
            self.header_written = true;
            debug!("ring `{}`: initialized, capacity {capacity}", self.name());
            return Ok(());
        }

        let base = self.region.as_slice()?.as_ptr();
        if load_u32(base, OFF_MAGIC) != MAGIC {
            return Err(Error::InvalidHeader);
        }
        let version = load_u32(base, OFF_VERSION);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                actual: version,
            });
        }
        let stored = load_u32(base, OFF_CAPACITY);
        if stored != capacity {
            return Err(Error::CapacityMismatch {
                stored,
                expected: capacity,
            });
        }
        // Cursor fields must be in range too; out-of-range values would
        // corrupt the occupancy arithmetic and the copy bounds.
        let header = RingHeader::load(base);
        if header.write_off >= capacity || header.read_off >= capacity || header.used > capacity {
            return Err(Error::InvalidHeader);
        }
        debug!("ring `{}`: attached, capacity {capacity}", self.name());
        Ok(())
    }

    /// Release the mapping; the header view dies with it.
    pub fn unmap(&mut self) -> Result<()> {
        self.region.unmap()
    }

    /// Append the whole payload, or nothing. *Caller must hold the lock.*
    ///
    /// Fails with [`Error::InsufficientSpace`] when the payload exceeds
    /// [`max_to_write`](Self::max_to_write); the ring is left untouched in
    /// that case. Payloads straddling the end of the circular area are copied
    /// in two pieces; cursors advance only after both copies complete.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let (base, _) = self.region.writable_base()?;
        let mut header = RingHeader::load(base);
        let available = header.capacity - header.used;
        if data.len() > available as usize {
            return Err(Error::InsufficientSpace {
                requested: u32::try_from(data.len()).unwrap_or(u32::MAX),
                available,
            });
        }
        if data.is_empty() {
            return Ok(());
        }

        let area = unsafe { base.add(HEADER_LEN) };
        let capacity = header.capacity as usize;
        let write_off = header.write_off as usize;
        let first = data.len().min(capacity - write_off);
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), area.add(write_off), first);
            if first < data.len() {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(first),
                    area,
                    data.len() - first,
                );
            }
        }

        header.write_off = ((write_off + data.len()) % capacity) as u32;
        header.used += data.len() as u32;
        header.store(base);
        Ok(())
    }

    /// Drain up to `out.len()` bytes into `out`; returns the count actually
    /// copied, 0 when the ring is empty. Never blocks. *Caller must hold the
    /// lock.*
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        let (base, _) = self.region.writable_base()?;
        let mut header = RingHeader::load(base);
        let n = out.len().min(header.used as usize);
        if n == 0 {
            return Ok(0);
        }

        let area = unsafe { base.add(HEADER_LEN) };
        let capacity = header.capacity as usize;
        let read_off = header.read_off as usize;
        let first = n.min(capacity - read_off);
        unsafe {
            std::ptr::copy_nonoverlapping(area.add(read_off), out.as_mut_ptr(), first);
            if first < n {
                std::ptr::copy_nonoverlapping(area, out.as_mut_ptr().add(first), n - first);
            }
        }

        header.read_off = ((read_off + n) % capacity) as u32;
        header.used -= n as u32;
        header.store(base);
        Ok(n)
    }

    /// Number of valid unread bytes. *Caller must hold the lock* for a
    /// consistent snapshot.
    pub fn data_to_read(&self) -> Result<u32> {
        let base = self.region.as_slice()?.as_ptr();
        Ok(load_u32(base, OFF_USED))
    }

    /// Free space left for writing. *Caller must hold the lock.*
    pub fn max_to_write(&self) -> Result<u32> {
        let base = self.region.as_slice()?.as_ptr();
        Ok(load_u32(base, OFF_CAPACITY) - load_u32(base, OFF_USED))
    }

    /// Total capacity of the circular area.
    pub fn capacity(&self) -> Result<u32> {
        let base = self.region.as_slice()?.as_ptr();
        Ok(load_u32(base, OFF_CAPACITY))
    }

    /// Reset the cursors and occupancy to empty without touching payload
    /// bytes; they become logically absent. *Caller must hold the lock.*
    pub fn clear(&self) -> Result<()> {
        let (base, _) = self.region.writable_base()?;
        let mut header = RingHeader::load(base);
        header.write_off = 0;
        header.read_off = 0;
        header.used = 0;
        header.store(base);
        Ok(())
    }
}

impl ShareLock for RingBufferController {
    fn lock(&self) -> Result<()> {
        self.region.lock()
    }

    fn try_lock(&self) -> Result<bool> {
        self.region.try_lock()
    }

    fn unlock(&self) -> Result<()> {
        self.region.unlock()
    }

    fn is_lock_abandoned(&self) -> bool {
        self.region.is_lock_abandoned()
    }
}
