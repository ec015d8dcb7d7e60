//! Segment locks and the per-key lock surface.
//!
//! Each segment owns one read/write lock. Internally the store uses RAII
//! guards; externally, [`KeyLock`] re-exposes the same lock with explicit
//! lock/unlock calls so collaborating layers (e.g. a blocking cache facade)
//! can hold a key's stripe across their own critical sections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::lock_api::{RawRwLock as _, RawRwLockTimed as _};
use parking_lot::RawRwLock;

use crate::error::StoreError;
use crate::sync::current_thread_id;

/// The two lock modes of a segment lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Shared mode.
    Read,
    /// Exclusive mode.
    Write,
}

/// A segment's read/write lock plus write-ownership tracking.
///
/// Not reentrant: acquiring the write lock twice from one thread deadlocks,
/// so lock holders (and store listeners) must not re-enter the store on the
/// same segment.
pub(crate) struct SegmentLock {
    raw: RawRwLock,
    /// Thread id of the current write holder, 0 when unowned.
    writer: AtomicU64,
}

impl SegmentLock {
    pub(crate) fn new() -> Self {
        Self {
            raw: RawRwLock::INIT,
            writer: AtomicU64::new(0),
        }
    }

    pub(crate) fn read(&self) -> ReadGuard<'_> {
        self.raw.lock_shared();
        ReadGuard { lock: self }
    }

    pub(crate) fn write(&self) -> WriteGuard<'_> {
        self.raw.lock_exclusive();
        self.writer.store(current_thread_id(), Ordering::Relaxed);
        WriteGuard { lock: self }
    }

    pub(crate) fn try_write(&self) -> Option<WriteGuard<'_>> {
        if self.raw.try_lock_exclusive() {
            self.writer.store(current_thread_id(), Ordering::Relaxed);
            Some(WriteGuard { lock: self })
        } else {
            None
        }
    }

    fn is_write_held_by_current_thread(&self) -> bool {
        self.writer.load(Ordering::Relaxed) == current_thread_id()
    }
}

pub(crate) struct ReadGuard<'a> {
    lock: &'a SegmentLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        // Held by construction.
        unsafe { self.lock.raw.unlock_shared() };
    }
}

pub(crate) struct WriteGuard<'a> {
    lock: &'a SegmentLock,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.writer.store(0, Ordering::Relaxed);
        // Held by construction.
        unsafe { self.lock.raw.unlock_exclusive() };
    }
}

/// A handle over the lock striping a given key, for external callers.
///
/// The lock is the key's *segment* lock, not a private per-key lock: locking
/// a key excludes writers from every key in the same stripe. Calls must be
/// paired; unlocking a mode that the calling context does not hold is a
/// contract violation (write unlocks are verified and panic, read unlocks
/// cannot be and are trusted).
pub struct KeyLock<'a> {
    lock: &'a SegmentLock,
}

impl<'a> KeyLock<'a> {
    pub(crate) fn new(lock: &'a SegmentLock) -> Self {
        Self { lock }
    }

    /// Acquire the lock in the given mode, blocking until available.
    pub fn lock(&self, ty: LockType) {
        match ty {
            LockType::Read => self.lock.raw.lock_shared(),
            LockType::Write => {
                self.lock.raw.lock_exclusive();
                self.lock.writer.store(current_thread_id(), Ordering::Relaxed);
            }
        }
    }

    /// Acquire the lock in the given mode, giving up after `timeout`.
    /// Returns whether the lock was acquired.
    pub fn try_lock(&self, ty: LockType, timeout: Duration) -> bool {
        match ty {
            LockType::Read => self.lock.raw.try_lock_shared_for(timeout),
            LockType::Write => {
                if self.lock.raw.try_lock_exclusive_for(timeout) {
                    self.lock.writer.store(current_thread_id(), Ordering::Relaxed);
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Release the lock in the given mode.
    ///
    /// # Panics
    ///
    /// Panics when releasing `Write` from a thread that does not hold it.
    pub fn unlock(&self, ty: LockType) {
        match ty {
            LockType::Read => {
                // Pairing with a prior read lock is the caller's contract.
                unsafe { self.lock.raw.unlock_shared() };
            }
            LockType::Write => {
                assert!(
                    self.lock.is_write_held_by_current_thread(),
                    "write lock not held by the current thread"
                );
                self.lock.writer.store(0, Ordering::Relaxed);
                unsafe { self.lock.raw.unlock_exclusive() };
            }
        }
    }

    /// Whether the current thread holds the lock in the given mode.
    ///
    /// Only `Write` ownership is tracked; querying `Read` returns
    /// [`StoreError::Unsupported`].
    pub fn is_held_by_current_thread(&self, ty: LockType) -> Result<bool, StoreError> {
        match ty {
            LockType::Read => Err(StoreError::Unsupported),
            LockType::Write => Ok(self.lock.is_write_held_by_current_thread()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_ownership_is_tracked() {
        let lock = SegmentLock::new();
        let key_lock = KeyLock::new(&lock);

        assert_eq!(key_lock.is_held_by_current_thread(LockType::Write), Ok(false));
        key_lock.lock(LockType::Write);
        assert_eq!(key_lock.is_held_by_current_thread(LockType::Write), Ok(true));
        key_lock.unlock(LockType::Write);
        assert_eq!(key_lock.is_held_by_current_thread(LockType::Write), Ok(false));
    }

    #[test]
    fn read_ownership_query_is_unsupported() {
        let lock = SegmentLock::new();
        let key_lock = KeyLock::new(&lock);
        assert_eq!(
            key_lock.is_held_by_current_thread(LockType::Read),
            Err(StoreError::Unsupported)
        );
    }

    #[test]
    fn readers_share_writers_exclude() {
        let lock = SegmentLock::new();
        let key_lock = KeyLock::new(&lock);

        key_lock.lock(LockType::Read);
        assert!(key_lock.try_lock(LockType::Read, Duration::from_millis(10)));
        assert!(!key_lock.try_lock(LockType::Write, Duration::from_millis(10)));
        key_lock.unlock(LockType::Read);
        key_lock.unlock(LockType::Read);

        assert!(key_lock.try_lock(LockType::Write, Duration::from_millis(10)));
        assert!(!key_lock.try_lock(LockType::Read, Duration::from_millis(10)));
        key_lock.unlock(LockType::Write);
    }

    #[test]
    fn guards_release_on_drop() {
        let lock = SegmentLock::new();
        {
            let _write = lock.write();
            assert!(lock.try_write().is_none());
        }
        assert!(lock.try_write().is_some());

        {
            let _read = lock.read();
            assert!(lock.try_write().is_none());
        }
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn another_thread_does_not_appear_as_write_holder() {
        use std::sync::Arc;
        let lock = Arc::new(SegmentLock::new());
        let _guard = lock.write();

        let lock2 = Arc::clone(&lock);
        let held_elsewhere = std::thread::spawn(move || {
            KeyLock::new(&lock2)
                .is_held_by_current_thread(LockType::Write)
                .unwrap()
        })
        .join()
        .unwrap();
        assert!(!held_elsewhere);
    }
}
