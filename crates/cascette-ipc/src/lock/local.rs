//! In-process reader/writer lock with separate acquire and release calls.

use parking_lot::lock_api::{RawRwLock as _, RawRwLockRecursive as _};

use super::AcquireMode;

/// Raw `parking_lot` rwlock whose release calls check that the lock is
/// actually held before unlocking.
///
/// Shared acquisition is recursive, so one thread can take the shared
/// side several times even while a writer is queued.
pub(crate) struct LocalRwLock {
    raw: parking_lot::RawRwLock,
}

impl LocalRwLock {
    pub(crate) const fn new() -> Self {
        Self {
            raw: <parking_lot::RawRwLock as parking_lot::lock_api::RawRwLock>::INIT,
        }
    }

    /// Take the exclusive side. Returns `false` if `mode` is non-blocking
    /// and the lock is busy.
    pub(crate) fn lock_exclusive(&self, mode: AcquireMode) -> bool {
        match mode {
            AcquireMode::Blocking => {
                self.raw.lock_exclusive();
                true
            }
            AcquireMode::NonBlocking => self.raw.try_lock_exclusive(),
        }
    }

    /// Take the shared side. Returns `false` if `mode` is non-blocking
    /// and a writer holds the lock.
    pub(crate) fn lock_shared(&self, mode: AcquireMode) -> bool {
        match mode {
            AcquireMode::Blocking => {
                self.raw.lock_shared_recursive();
                true
            }
            AcquireMode::NonBlocking => self.raw.try_lock_shared_recursive(),
        }
    }

    pub(crate) fn is_locked_exclusive(&self) -> bool {
        self.raw.is_locked_exclusive()
    }

    /// Release the exclusive side. Returns `false` if it was not held.
    #[allow(unsafe_code)]
    pub(crate) fn unlock_exclusive(&self) -> bool {
        if !self.raw.is_locked_exclusive() {
            return false;
        }
        // SAFETY: the exclusive side is held, and parking_lot does not
        // tie ownership to the acquiring thread.
        unsafe { self.raw.unlock_exclusive() };
        true
    }

    /// Release one shared hold. Returns `false` if no shared hold exists.
    #[allow(unsafe_code)]
    pub(crate) fn unlock_shared(&self) -> bool {
        if !self.raw.is_locked() || self.raw.is_locked_exclusive() {
            return false;
        }
        // SAFETY: at least one shared hold exists.
        unsafe { self.raw.unlock_shared() };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_excludes_shared() {
        let lock = LocalRwLock::new();
        assert!(lock.lock_exclusive(AcquireMode::NonBlocking));
        assert!(!lock.lock_shared(AcquireMode::NonBlocking));
        assert!(!lock.lock_exclusive(AcquireMode::NonBlocking));
        assert!(lock.unlock_exclusive());
        assert!(lock.lock_shared(AcquireMode::NonBlocking));
        assert!(lock.unlock_shared());
    }

    #[test]
    fn test_recursive_shared() {
        let lock = LocalRwLock::new();
        assert!(lock.lock_shared(AcquireMode::Blocking));
        assert!(lock.lock_shared(AcquireMode::Blocking));
        assert!(!lock.lock_exclusive(AcquireMode::NonBlocking));
        assert!(lock.unlock_shared());
        assert!(lock.unlock_shared());
        assert!(lock.lock_exclusive(AcquireMode::NonBlocking));
        assert!(lock.unlock_exclusive());
    }

    #[test]
    fn test_unmatched_release_is_rejected() {
        let lock = LocalRwLock::new();
        assert!(!lock.unlock_exclusive());
        assert!(!lock.unlock_shared());

        assert!(lock.lock_shared(AcquireMode::Blocking));
        assert!(!lock.unlock_exclusive());
        assert!(lock.unlock_shared());
    }
}
