//! Named cross-process shared memory regions

use std::cell::Cell;
use std::io;

use log::{debug, warn};

use crate::name::SegmentName;
use crate::platform::{self, AccessMode, AcquireOutcome, Segment, SharedLock};
use crate::{Error, Result};

/// How `create` resolved the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The named segment did not exist; this call allocated it.
    CreatedNew,
    /// Another process created the segment first; this call attached to it.
    /// The attached segment's actual size governs, not the requested one.
    CreatedExisting,
}

#[derive(Debug)]
struct Mapping {
    base: *mut u8,
    len: usize,
    mode: AccessMode,
}

/// One named segment plus its paired cross-process lock.
///
/// Multiple instances (in the same or different processes) opened under the
/// same name share the same underlying bytes and the same lock; the segment
/// is the single source of truth. The lock protects the *payload* only;
/// lifecycle calls (`map`, `unmap`, `close`) need external synchronization if
/// several threads share one instance.
#[derive(Debug)]
pub struct SharedMemoryRegion {
    name: SegmentName,
    segment: Option<Segment>,
    lock: Option<SharedLock>,
    mapping: Option<Mapping>,
    outcome: Option<CreateOutcome>,
    clear_on_map: bool,
    // Outcome of the acquisition currently held by this instance, None when
    // not holding the lock.
    held: Cell<Option<AcquireOutcome>>,
}

// The mapping is OS-shared memory; the handle can move between threads.
unsafe impl Send for SharedMemoryRegion {}

impl SharedMemoryRegion {
    /// Create a named segment of at least `size` bytes, or attach to an
    /// existing one if another process created it first (a benign race).
    ///
    /// With `open_if_created == false` a freshly created segment is zeroed on
    /// its first map; with `true`, pre-existing bytes are left intact. The
    /// paired lock is created or opened alongside.
    pub fn create(name: &str, size: usize, open_if_created: bool) -> Result<Self> {
        let name = SegmentName::new(name)?;
        if size == 0 {
            return Err(Error::CreateFailed {
                name: name.as_str().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "size must be non-zero"),
            });
        }

        // Lock first: any process that can see the segment can then rely on
        // the lock existing too.
        let lock = SharedLock::create_or_open(&name.lock_os_name()).map_err(|source| {
            Error::CreateFailed {
                name: name.as_str().to_string(),
                source,
            }
        })?;

        let (segment, created_new) = Segment::create_or_open(&name.segment_os_name(), size)
            .map_err(|source| Error::CreateFailed {
                name: name.as_str().to_string(),
                source,
            })?;

        let outcome = if created_new {
            CreateOutcome::CreatedNew
        } else {
            CreateOutcome::CreatedExisting
        };
        debug!("segment `{name}`: create -> {outcome:?}");

        Ok(Self {
            name,
            segment: Some(segment),
            lock: Some(lock),
            mapping: None,
            outcome: Some(outcome),
            clear_on_map: created_new && !open_if_created,
            held: Cell::new(None),
        })
    }

    /// Open an existing named segment and its paired lock. Never creates the
    /// segment; fails if no segment with that name exists.
    pub fn open(name: &str) -> Result<Self> {
        let name = SegmentName::new(name)?;
        let segment =
            Segment::open(&name.segment_os_name()).map_err(|source| Error::OpenFailed {
                name: name.as_str().to_string(),
                source,
            })?;
        // The segment was visible, so its lock already exists; create_or_open
        // only attaches here.
        let lock = SharedLock::create_or_open(&name.lock_os_name()).map_err(|source| {
            Error::OpenFailed {
                name: name.as_str().to_string(),
                source,
            }
        })?;
        debug!("segment `{name}`: opened");

        Ok(Self {
            name,
            segment: Some(segment),
            lock: Some(lock),
            mapping: None,
            outcome: None,
            clear_on_map: false,
            held: Cell::new(None),
        })
    }

    /// Remove the named segment and its paired lock system-wide.
    ///
    /// Existing mappings in running processes stay valid; the objects are
    /// reclaimed once every process has closed them.
    pub fn unlink(name: &str) -> Result<()> {
        let name = SegmentName::new(name)?;
        let seg = platform::unlink(&name.segment_os_name());
        let lock = platform::unlink(&name.lock_os_name());
        seg.and(lock).map_err(|source| Error::UnlinkFailed {
            name: name.as_str().to_string(),
            source,
        })
    }

    /// True once `create` or `open` produced a valid handle and `close` has
    /// not run.
    pub fn is_ready(&self) -> bool {
        self.segment.is_some()
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// How `create` resolved the name; `None` for opened regions.
    pub fn create_outcome(&self) -> Option<CreateOutcome> {
        self.outcome
    }

    /// True iff this instance's `create` allocated the segment.
    pub fn created_new(&self) -> bool {
        self.outcome == Some(CreateOutcome::CreatedNew)
    }

    /// Map the segment into this process. `size == 0` maps the whole
    /// underlying object; a non-zero size maps that many bytes and must not
    /// exceed the object's actual size. Re-mapping requires `unmap` first.
    pub fn map(&mut self, mode: AccessMode, size: usize) -> Result<()> {
        let segment = self.segment.as_ref().ok_or(Error::NotReady)?;
        if self.mapping.is_some() {
            return Err(Error::AlreadyMapped);
        }
        let len = if size == 0 {
            segment.size().map_err(Error::MapFailed)?
        } else {
            size
        };
        let base = segment.map(mode, len).map_err(Error::MapFailed)?;
        self.mapping = Some(Mapping { base, len, mode });
        debug!("segment `{}`: mapped {len} bytes ({mode:?})", self.name);

        if self.clear_on_map {
            // Fresh-state guarantee for a segment we allocated. ftruncate
            // already zero-fills new objects, so a read-only first map can
            // rely on that and skip the explicit pass.
            self.clear_on_map = false;
            if mode == AccessMode::ReadWrite {
                self.clear()?;
            }
        }
        Ok(())
    }

    /// Release the mapping. A no-op success when not mapped, so every exit
    /// path can call it unconditionally.
    pub fn unmap(&mut self) -> Result<()> {
        if let Some(mapping) = self.mapping.take() {
            platform::unmap(mapping.base, mapping.len).map_err(Error::MapFailed)?;
        }
        Ok(())
    }

    /// Release the handle and the lock handle; implicitly unmaps. The
    /// underlying named objects survive while other processes hold them.
    pub fn close(&mut self) {
        if self.held.get().is_some() {
            let _ = self.unlock();
        }
        let _ = self.unmap();
        self.segment = None;
        self.lock = None;
        debug!("segment `{}`: closed", self.name);
    }

    /// Acquire the cross-process lock, blocking until it is obtained.
    pub fn lock(&self) -> Result<()> {
        let lock = self.lock.as_ref().ok_or(Error::NotReady)?;
        match lock.acquire(true).map_err(Error::Lock)? {
            AcquireOutcome::WouldBlock => Err(Error::Lock(io::Error::new(
                io::ErrorKind::WouldBlock,
                "blocking acquire reported WouldBlock",
            ))),
            outcome => {
                if outcome == AcquireOutcome::AcquiredAbandoned {
                    warn!(
                        "segment `{}`: lock was abandoned by a dead holder; \
                         shared contents are of unknown consistency",
                        self.name
                    );
                }
                self.held.set(Some(outcome));
                Ok(())
            }
        }
    }

    /// Attempt to acquire the lock without blocking. Returns whether it was
    /// acquired.
    pub fn try_lock(&self) -> Result<bool> {
        let lock = self.lock.as_ref().ok_or(Error::NotReady)?;
        match lock.acquire(false).map_err(Error::Lock)? {
            AcquireOutcome::WouldBlock => Ok(false),
            outcome => {
                if outcome == AcquireOutcome::AcquiredAbandoned {
                    warn!(
                        "segment `{}`: lock was abandoned by a dead holder",
                        self.name
                    );
                }
                self.held.set(Some(outcome));
                Ok(true)
            }
        }
    }

    /// Release the cross-process lock.
    pub fn unlock(&self) -> Result<()> {
        let lock = self.lock.as_ref().ok_or(Error::NotReady)?;
        lock.release().map_err(Error::Lock)?;
        self.held.set(None);
        Ok(())
    }

    /// Whether the currently held acquisition found the lock abandoned by a
    /// dead holder. Only meaningful between `lock`/`try_lock` and the
    /// matching `unlock`; false otherwise. The region never repairs the
    /// payload itself; discard-or-recover is the caller's policy.
    pub fn is_lock_abandoned(&self) -> bool {
        self.held.get() == Some(AcquireOutcome::AcquiredAbandoned)
    }

    /// Size in bytes of the current mapping; 0 when unmapped.
    pub fn data_size(&self) -> usize {
        self.mapping.as_ref().map_or(0, |m| m.len)
    }

    /// View of the mapped bytes.
    pub fn as_slice(&self) -> Result<&[u8]> {
        let mapping = self.mapping.as_ref().ok_or(Error::NotMapped)?;
        Ok(unsafe { std::slice::from_raw_parts(mapping.base, mapping.len) })
    }

    /// Mutable view of the mapped bytes. Requires a read-write mapping.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8]> {
        let mapping = self.mapping.as_ref().ok_or(Error::NotMapped)?;
        if mapping.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        Ok(unsafe { std::slice::from_raw_parts_mut(mapping.base, mapping.len) })
    }

    /// Base pointer and length of a writable mapping, for layers that
    /// interpret the bytes in place under the lock.
    pub(crate) fn writable_base(&self) -> Result<(*mut u8, usize)> {
        let mapping = self.mapping.as_ref().ok_or(Error::NotMapped)?;
        if mapping.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        Ok((mapping.base, mapping.len))
    }

    /// Zero the full mapped range. Callers sharing the segment must hold the
    /// lock themselves to avoid racing concurrent readers and writers.
    pub fn clear(&mut self) -> Result<()> {
        let mapping = self.mapping.as_ref().ok_or(Error::NotMapped)?;
        if mapping.mode == AccessMode::ReadOnly {
            return Err(Error::ReadOnly);
        }
        unsafe { std::ptr::write_bytes(mapping.base, 0, mapping.len) };
        Ok(())
    }
}

impl Drop for SharedMemoryRegion {
    fn drop(&mut self) {
        self.close();
    }
}
