//! POSIX shared memory and lock primitives
//!
//! Segments are `shm_open` objects mapped with `mmap`. The paired lock is a
//! process-shared `pthread_mutex_t` living in a small companion segment; on
//! Linux the mutex is robust, so a holder dying surfaces as `EOWNERDEAD` on
//! the next acquisition. Other Unixes lack robust mutexes and never report
//! abandonment.

use std::ffi::CString;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use super::{AccessMode, AcquireOutcome};

fn c_name(os_name: &str) -> io::Result<CString> {
    CString::new(os_name)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL byte"))
}

fn errno() -> io::Error {
    io::Error::last_os_error()
}

/// Handle to a named shared memory object.
#[derive(Debug)]
pub struct Segment {
    fd: libc::c_int,
}

impl Segment {
    /// Create the named object, or open it if another process won the
    /// creation race. Returns whether this call created it.
    pub fn create_or_open(os_name: &str, size: usize) -> io::Result<(Self, bool)> {
        let name = c_name(os_name)?;

        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd >= 0 {
            // Fresh object: size it. ftruncate zero-fills the new pages.
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } != 0 {
                let err = errno();
                unsafe {
                    libc::close(fd);
                    libc::shm_unlink(name.as_ptr());
                }
                return Err(err);
            }
            return Ok((Self { fd }, true));
        }

        let exists = errno();
        if exists.raw_os_error() != Some(libc::EEXIST) {
            return Err(exists);
        }

        // Someone else created it first; attach to theirs.
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(errno());
        }
        Ok((Self { fd }, false))
    }

    /// Open an existing named object. Never creates.
    pub fn open(os_name: &str) -> io::Result<Self> {
        let name = c_name(os_name)?;
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0o600) };
        if fd < 0 {
            return Err(errno());
        }
        Ok(Self { fd })
    }

    /// Actual size of the underlying object in bytes.
    pub fn size(&self) -> io::Result<usize> {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        if unsafe { libc::fstat(self.fd, &mut st) } != 0 {
            return Err(errno());
        }
        Ok(st.st_size as usize)
    }

    /// Map `len` bytes of the object into the address space.
    ///
    /// `len` must not exceed the object size; accessing pages past the end of
    /// a shm object raises SIGBUS, so the bound is checked here instead.
    pub fn map(&self, mode: AccessMode, len: usize) -> io::Result<*mut u8> {
        if len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map zero bytes",
            ));
        }
        let actual = self.size()?;
        if len > actual {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("requested {len} bytes but object is {actual} bytes"),
            ));
        }
        let prot = match mode {
            AccessMode::ReadOnly => libc::PROT_READ,
            AccessMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                prot,
                libc::MAP_SHARED,
                self.fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(errno());
        }
        Ok(base as *mut u8)
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// Release a mapping produced by [`Segment::map`].
pub fn unmap(base: *mut u8, len: usize) -> io::Result<()> {
    if unsafe { libc::munmap(base as *mut libc::c_void, len) } != 0 {
        return Err(errno());
    }
    Ok(())
}

/// Remove a named object system-wide. Existing mappings stay valid.
pub fn unlink(os_name: &str) -> io::Result<()> {
    let name = c_name(os_name)?;
    if unsafe { libc::shm_unlink(name.as_ptr()) } != 0 {
        return Err(errno());
    }
    Ok(())
}

const LOCK_UNINIT: u32 = 0;
const LOCK_READY: u32 = 1;

/// How long openers wait for the creator to publish the initialized mutex.
const LOCK_INIT_WAIT: Duration = Duration::from_millis(1);
const LOCK_INIT_RETRIES: u32 = 2000;

/// Contents of the companion lock segment, shared across processes.
#[repr(C)]
struct LockShared {
    state: AtomicU32,
    _pad: u32,
    mutex: libc::pthread_mutex_t,
}

/// A named cross-process mutex backed by its own small segment.
#[derive(Debug)]
pub struct SharedLock {
    _segment: Segment,
    shared: *mut LockShared,
}

// The mapping is process-wide shared state; the pointer itself is stable for
// the lifetime of the handle.
unsafe impl Send for SharedLock {}
unsafe impl Sync for SharedLock {}

impl SharedLock {
    /// Create or open the named lock.
    ///
    /// Exactly one process wins the creation race and initializes the mutex;
    /// everyone else waits for the published ready state.
    pub fn create_or_open(os_name: &str) -> io::Result<Self> {
        let size = std::mem::size_of::<LockShared>();
        let (segment, created_new) = Segment::create_or_open(os_name, size)?;

        if !created_new {
            // The creator sizes the object before publishing; wait for it.
            let mut retries = 0;
            while segment.size()? < size {
                retries += 1;
                if retries > LOCK_INIT_RETRIES {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "lock segment was never sized by its creator",
                    ));
                }
                thread::sleep(LOCK_INIT_WAIT);
            }
        }

        let base = segment.map(AccessMode::ReadWrite, size)?;
        let shared = base as *mut LockShared;

        if created_new {
            unsafe { Self::init_mutex(shared) }?;
        } else {
            let state = unsafe { &(*shared).state };
            let mut retries = 0;
            while state.load(Ordering::Acquire) != LOCK_READY {
                retries += 1;
                if retries > LOCK_INIT_RETRIES {
                    let _ = unmap(base, size);
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "lock was never initialized by its creator",
                    ));
                }
                thread::sleep(LOCK_INIT_WAIT);
            }
        }

        Ok(Self {
            _segment: segment,
            shared,
        })
    }

    /// Initialize the process-shared mutex and publish it.
    unsafe fn init_mutex(shared: *mut LockShared) -> io::Result<()> {
        let mut attr: libc::pthread_mutexattr_t = std::mem::zeroed();
        let rc = libc::pthread_mutexattr_init(&mut attr);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        libc::pthread_mutexattr_setpshared(&mut attr, libc::PTHREAD_PROCESS_SHARED);
        #[cfg(any(target_os = "linux", target_os = "android"))]
        libc::pthread_mutexattr_setrobust(&mut attr, libc::PTHREAD_MUTEX_ROBUST);

        let rc = libc::pthread_mutex_init(std::ptr::addr_of_mut!((*shared).mutex), &attr);
        libc::pthread_mutexattr_destroy(&mut attr);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }

        (*shared).state.store(LOCK_READY, Ordering::Release);
        Ok(())
    }

    /// Acquire the lock, blocking or not.
    pub fn acquire(&self, blocking: bool) -> io::Result<AcquireOutcome> {
        let mutex = unsafe { std::ptr::addr_of_mut!((*self.shared).mutex) };
        let rc = if blocking {
            unsafe { libc::pthread_mutex_lock(mutex) }
        } else {
            unsafe { libc::pthread_mutex_trylock(mutex) }
        };
        match rc {
            0 => Ok(AcquireOutcome::Acquired),
            libc::EBUSY if !blocking => Ok(AcquireOutcome::WouldBlock),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            libc::EOWNERDEAD => {
                // Previous holder died. Make the mutex usable again; the
                // protected bytes are the caller's problem to assess.
                let rc = unsafe { libc::pthread_mutex_consistent(mutex) };
                if rc != 0 {
                    return Err(io::Error::from_raw_os_error(rc));
                }
                Ok(AcquireOutcome::AcquiredAbandoned)
            }
            rc => Err(io::Error::from_raw_os_error(rc)),
        }
    }

    /// Release the lock. Fails if the caller does not hold it.
    pub fn release(&self) -> io::Result<()> {
        let mutex = unsafe { std::ptr::addr_of_mut!((*self.shared).mutex) };
        let rc = unsafe { libc::pthread_mutex_unlock(mutex) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        let _ = unmap(self.shared as *mut u8, std::mem::size_of::<LockShared>());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(prefix: &str) -> String {
        use std::time::{SystemTime, UNIX_EPOCH};
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        format!("/{}_{}_{}", prefix, std::process::id(), ts)
    }

    #[test]
    fn create_then_open_share_bytes() {
        let name = unique_name("shmring_posix_share");
        let (seg, created_new) = Segment::create_or_open(&name, 4096).unwrap();
        assert!(created_new);
        assert_eq!(seg.size().unwrap(), 4096);

        let writer = seg.map(AccessMode::ReadWrite, 4096).unwrap();
        unsafe { *writer = 0xA5 };

        let other = Segment::open(&name).unwrap();
        let reader = other.map(AccessMode::ReadOnly, 4096).unwrap();
        assert_eq!(unsafe { *reader }, 0xA5);

        unmap(writer, 4096).unwrap();
        unmap(reader, 4096).unwrap();
        unlink(&name).unwrap();
    }

    #[test]
    fn second_create_attaches() {
        let name = unique_name("shmring_posix_race");
        let (_a, first) = Segment::create_or_open(&name, 1024).unwrap();
        let (_b, second) = Segment::create_or_open(&name, 1024).unwrap();
        assert!(first);
        assert!(!second);
        unlink(&name).unwrap();
    }

    #[test]
    fn open_missing_fails() {
        let name = unique_name("shmring_posix_missing");
        let err = Segment::open(&name).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn map_beyond_object_fails() {
        let name = unique_name("shmring_posix_oversize");
        let (seg, _) = Segment::create_or_open(&name, 1024).unwrap();
        assert!(seg.map(AccessMode::ReadWrite, 8192).is_err());
        unlink(&name).unwrap();
    }

    #[test]
    fn lock_round_trip() {
        let name = unique_name("shmring_posix_lock");
        let lock = SharedLock::create_or_open(&name).unwrap();
        assert_eq!(lock.acquire(true).unwrap(), AcquireOutcome::Acquired);
        // Held by us: a second handle's try-acquire must not block.
        let other = SharedLock::create_or_open(&name).unwrap();
        assert_eq!(other.acquire(false).unwrap(), AcquireOutcome::WouldBlock);
        lock.release().unwrap();
        assert_eq!(other.acquire(false).unwrap(), AcquireOutcome::Acquired);
        other.release().unwrap();
        unlink(&name).unwrap();
    }
}
