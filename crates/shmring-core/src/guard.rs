//! RAII scoped locking over shared regions

use crate::Result;

/// Anything carrying a named cross-process lock.
///
/// Implemented by [`SharedMemoryRegion`](crate::SharedMemoryRegion) and
/// [`RingBufferController`](crate::RingBufferController); method naming
/// follows the region contract so either can sit behind a [`MemoryGuard`].
pub trait ShareLock {
    /// Block until the lock is acquired.
    fn lock(&self) -> Result<()>;
    /// Attempt to acquire without blocking; returns whether it was acquired.
    fn try_lock(&self) -> Result<bool>;
    /// Release the lock.
    fn unlock(&self) -> Result<()>;
    /// Whether the held acquisition found the lock abandoned. Meaningful only
    /// while the lock is held.
    fn is_lock_abandoned(&self) -> bool;
}

impl ShareLock for crate::SharedMemoryRegion {
    fn lock(&self) -> Result<()> {
        crate::SharedMemoryRegion::lock(self)
    }

    fn try_lock(&self) -> Result<bool> {
        crate::SharedMemoryRegion::try_lock(self)
    }

    fn unlock(&self) -> Result<()> {
        crate::SharedMemoryRegion::unlock(self)
    }

    fn is_lock_abandoned(&self) -> bool {
        crate::SharedMemoryRegion::is_lock_abandoned(self)
    }
}

/// RAII guard: acquires the cross-process lock on construction and releases
/// it unconditionally on drop, so every exit path unlocks.
pub struct MemoryGuard<'a, T: ShareLock> {
    owner: &'a T,
}

impl<'a, T: ShareLock> MemoryGuard<'a, T> {
    /// Acquire the lock, blocking until it is obtained.
    pub fn new(owner: &'a T) -> Result<Self> {
        owner.lock()?;
        Ok(Self { owner })
    }

    /// Acquire without blocking; `None` if the lock is currently held
    /// elsewhere.
    pub fn try_new(owner: &'a T) -> Result<Option<Self>> {
        if owner.try_lock()? {
            Ok(Some(Self { owner }))
        } else {
            Ok(None)
        }
    }

    /// Whether this acquisition found the lock abandoned by a dead holder.
    /// The shared bytes are then of unknown consistency; recovery policy is
    /// the caller's.
    pub fn is_abandoned(&self) -> bool {
        self.owner.is_lock_abandoned()
    }
}

impl<T: ShareLock> Drop for MemoryGuard<'_, T> {
    fn drop(&mut self) {
        let _ = self.owner.unlock();
    }
}
