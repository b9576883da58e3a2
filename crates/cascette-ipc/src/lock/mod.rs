//! Cross-process reader/writer locks.
//!
//! [`IpcLock`] is the caller-facing capability set. Two kernel-backed
//! implementations exist:
//!
//! - [`FlockMutex`]: an advisory `flock` on one open descriptor,
//!   composed with an in-process rwlock
//! - [`SemLock`]: a two-member System V semaphore set running the
//!   counting read/write protocol
//!
//! [`Lock`] picks one of them at construction time from an
//! [`IpcConfig`] and never switches afterwards.
//!
//! Locks are advisory. They order processes that take them; they
//! cannot stop a process that touches the shared resource without
//! taking the lock.

pub mod flock;
mod local;
pub mod semaphore;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{IpcConfig, Result, derive_key};

pub use flock::{Flock, FlockMutex};
pub use semaphore::{SemLock, SemState};

/// Whether an acquire may wait for the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AcquireMode {
    /// Wait until the lock is available.
    #[default]
    Blocking,
    /// Fail with [`IpcError::WouldBlock`](crate::IpcError::WouldBlock)
    /// instead of waiting.
    NonBlocking,
}

/// Reader/writer lock shared between processes.
///
/// Releases never fail from the caller's point of view. Problems on the
/// release path are logged with `tracing::warn!` instead.
pub trait IpcLock: Send + Sync {
    /// Take the lock exclusively.
    fn acquire_exclusive(&self, mode: AcquireMode) -> Result<()>;

    /// Release an exclusive hold.
    fn release_exclusive(&self);

    /// Take the lock shared.
    fn acquire_shared(&self, mode: AcquireMode) -> Result<()>;

    /// Release one shared hold.
    fn release_shared(&self);

    /// Release the kernel resources behind this handle.
    fn close(&self);

    /// Block until the lock is held exclusively, releasing it when the
    /// guard drops.
    fn write(&self) -> Result<WriteGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire_exclusive(AcquireMode::Blocking)?;
        Ok(WriteGuard { lock: self })
    }

    /// Like [`write`](Self::write) but never waits.
    fn try_write(&self) -> Result<WriteGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire_exclusive(AcquireMode::NonBlocking)?;
        Ok(WriteGuard { lock: self })
    }

    /// Block until the lock is held shared, releasing it when the guard
    /// drops.
    fn read(&self) -> Result<ReadGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire_shared(AcquireMode::Blocking)?;
        Ok(ReadGuard { lock: self })
    }

    /// Like [`read`](Self::read) but never waits.
    fn try_read(&self) -> Result<ReadGuard<'_, Self>>
    where
        Self: Sized,
    {
        self.acquire_shared(AcquireMode::NonBlocking)?;
        Ok(ReadGuard { lock: self })
    }
}

/// Exclusive hold released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a, L: IpcLock + ?Sized> {
    lock: &'a L,
}

impl<L: IpcLock + ?Sized> Drop for WriteGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.release_exclusive();
    }
}

impl<L: IpcLock + ?Sized> fmt::Debug for WriteGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteGuard").finish_non_exhaustive()
    }
}

/// Shared hold released on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a, L: IpcLock + ?Sized> {
    lock: &'a L,
}

impl<L: IpcLock + ?Sized> Drop for ReadGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.release_shared();
    }
}

impl<L: IpcLock + ?Sized> fmt::Debug for ReadGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadGuard").finish_non_exhaustive()
    }
}

/// Backend selected by the lock factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockKind {
    /// System V semaphore set keyed by the path
    #[default]
    Semaphore,
    /// Advisory `flock` on the path itself
    Flock,
}

/// A lock built by the factory.
pub enum Lock {
    /// `flock`-backed lock
    Flock(FlockMutex),
    /// Semaphore-backed lock
    Semaphore(SemLock),
}

impl Lock {
    /// Build the lock selected by `config.lock_kind` for `path`.
    ///
    /// The flock backend opens `path` directly. The semaphore backend
    /// derives its key from `path` and `config.discriminator`. Either
    /// way the path must already exist.
    pub fn open<P: AsRef<Path>>(path: P, config: &IpcConfig) -> Result<Self> {
        match config.lock_kind {
            LockKind::Flock => FlockMutex::open(path).map(Self::Flock),
            LockKind::Semaphore => {
                let key = derive_key(path, config.discriminator)?;
                SemLock::with_config(key, config).map(Self::Semaphore)
            }
        }
    }

    /// Which backend this lock uses.
    pub const fn kind(&self) -> LockKind {
        match self {
            Self::Flock(_) => LockKind::Flock,
            Self::Semaphore(_) => LockKind::Semaphore,
        }
    }

    fn inner(&self) -> &dyn IpcLock {
        match self {
            Self::Flock(lock) => lock,
            Self::Semaphore(lock) => lock,
        }
    }
}

impl IpcLock for Lock {
    fn acquire_exclusive(&self, mode: AcquireMode) -> Result<()> {
        self.inner().acquire_exclusive(mode)
    }

    fn release_exclusive(&self) {
        self.inner().release_exclusive();
    }

    fn acquire_shared(&self, mode: AcquireMode) -> Result<()> {
        self.inner().acquire_shared(mode)
    }

    fn release_shared(&self) {
        self.inner().release_shared();
    }

    fn close(&self) {
        self.inner().close();
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn lock_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("factory.lock");
        std::fs::write(&path, b"").expect("write");
        (dir, path)
    }

    #[test]
    fn test_factory_selects_flock() {
        let (_dir, path) = lock_file();
        let config = IpcConfig::default().with_lock_kind(LockKind::Flock);
        let lock = Lock::open(&path, &config).expect("open");
        assert_eq!(lock.kind(), LockKind::Flock);

        {
            let _guard = lock.write().expect("write");
        }
        let _guard = lock.read().expect("read");
    }

    #[test]
    fn test_factory_selects_semaphore() {
        let (_dir, path) = lock_file();
        let config = IpcConfig::default()
            .with_lock_kind(LockKind::Semaphore)
            .with_discriminator(0x21);
        let lock = Lock::open(&path, &config).expect("open");
        assert_eq!(lock.kind(), LockKind::Semaphore);

        {
            let _guard = lock.write().expect("write");
            assert!(lock.try_read().expect_err("writer active").is_would_block());
        }
        {
            let _guard = lock.read().expect("read");
        }
        lock.close();
    }

    #[test]
    fn test_factory_missing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing");
        for kind in [LockKind::Flock, LockKind::Semaphore] {
            let config = IpcConfig::default().with_lock_kind(kind);
            assert!(Lock::open(&missing, &config).is_err());
        }
    }

    #[test]
    fn test_lock_kind_serde_names() {
        let json = serde_json::to_string(&LockKind::Flock).expect("serialize");
        assert_eq!(json, "\"flock\"");
        let kind: LockKind = serde_json::from_str("\"semaphore\"").expect("deserialize");
        assert_eq!(kind, LockKind::Semaphore);
    }
}
