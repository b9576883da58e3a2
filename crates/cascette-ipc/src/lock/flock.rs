//! Advisory `flock` locks.
//!
//! [`Flock`] is a bare descriptor lock. [`FlockMutex`] layers an
//! in-process rwlock on top so threads of one process get proper
//! reader/writer semantics, while other processes are ordered through
//! the shared file.
//!
//! `flock` locks belong to the open file description, not to a thread.
//! Two handles opened on the same path conflict with each other even
//! inside one process; two threads sharing one handle never do.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use libc::c_int;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::local::LocalRwLock;
use super::{AcquireMode, IpcLock};
use crate::{IpcError, Result, sys};

/// An open file used as an advisory lock.
#[derive(Debug)]
pub struct Flock {
    path: PathBuf,
    file: File,
}

impl Flock {
    /// Open `path` for reading. No lock is taken.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| IpcError::from_os("open lock file", e))?;
        Ok(Self { path, file })
    }

    /// Take an exclusive lock on the descriptor.
    pub fn exclusive_lock(&self, mode: AcquireMode) -> Result<()> {
        self.apply(libc::LOCK_EX, mode)
    }

    /// Take a shared lock on the descriptor.
    ///
    /// Re-locking a descriptor that already holds a shared lock succeeds
    /// immediately.
    pub fn shared_lock(&self, mode: AcquireMode) -> Result<()> {
        self.apply(libc::LOCK_SH, mode)
    }

    /// Drop whatever lock the descriptor holds.
    pub fn unlock_all(&self) -> Result<()> {
        self.apply(libc::LOCK_UN, AcquireMode::Blocking)
    }

    /// Path this lock was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close the descriptor, releasing every lock it holds.
    pub fn close(self) {
        drop(self.file);
    }

    fn apply(&self, operation: c_int, mode: AcquireMode) -> Result<()> {
        let operation = match mode {
            AcquireMode::Blocking => operation,
            AcquireMode::NonBlocking => operation | libc::LOCK_NB,
        };
        loop {
            match sys::flock(self.file.as_raw_fd(), operation) {
                Ok(()) => return Ok(()),
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(IpcError::from_os("flock", e)),
            }
        }
    }
}

/// Reader/writer lock backed by one descriptor's `flock`.
///
/// The OS-level shared lock is taken on every shared acquire and only
/// dropped when the last in-process shared holder releases.
pub struct FlockMutex {
    path: PathBuf,
    /// `None` once closed. Only touched while `local` is held.
    file: RwLock<Option<Flock>>,
    local: LocalRwLock,
    /// Active shared holders in this process.
    shared: AtomicUsize,
    /// Serialises shared-count transitions with the matching `flock` calls.
    transition: Mutex<()>,
}

impl std::fmt::Debug for FlockMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlockMutex")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl FlockMutex {
    /// Open `path` as a lock file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = Flock::open(path)?;
        debug!("Opened flock mutex on {}", file.path().display());
        Ok(Self {
            path: file.path().to_path_buf(),
            file: RwLock::new(Some(file)),
            local: LocalRwLock::new(),
            shared: AtomicUsize::new(0),
            transition: Mutex::new(()),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of shared holders in this process.
    pub fn shared_holders(&self) -> usize {
        self.shared.load(Ordering::Acquire)
    }

    /// Whether [`close`](IpcLock::close) has run.
    pub fn is_closed(&self) -> bool {
        self.file.read().is_none()
    }

    fn with_file<T>(&self, op: impl FnOnce(&Flock) -> Result<T>) -> Result<T> {
        match self.file.read().as_ref() {
            Some(file) => op(file),
            None => Err(IpcError::Closed),
        }
    }

    fn drop_shared_hold(&self) {
        if self.shared.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Err(e) = self.with_file(Flock::unlock_all) {
                warn!("Failed to unlock {}: {e}", self.path.display());
            }
        }
    }
}

impl IpcLock for FlockMutex {
    fn acquire_exclusive(&self, mode: AcquireMode) -> Result<()> {
        if !self.local.lock_exclusive(mode) {
            return Err(IpcError::WouldBlock);
        }
        if let Err(e) = self.with_file(|f| f.exclusive_lock(mode)) {
            self.local.unlock_exclusive();
            return Err(e);
        }
        Ok(())
    }

    fn release_exclusive(&self) {
        if !self.local.is_locked_exclusive() {
            warn!(
                "Exclusive release on {} without an exclusive hold",
                self.path.display()
            );
            return;
        }
        if let Err(e) = self.with_file(Flock::unlock_all) {
            warn!("Failed to unlock {}: {e}", self.path.display());
        }
        self.local.unlock_exclusive();
    }

    fn acquire_shared(&self, mode: AcquireMode) -> Result<()> {
        if !self.local.lock_shared(mode) {
            return Err(IpcError::WouldBlock);
        }

        let transition = match mode {
            AcquireMode::Blocking => Some(self.transition.lock()),
            AcquireMode::NonBlocking => self.transition.try_lock(),
        };
        let result = if transition.is_some() {
            self.shared.fetch_add(1, Ordering::AcqRel);
            let locked = self.with_file(|f| f.shared_lock(mode));
            if locked.is_err() {
                self.drop_shared_hold();
            }
            locked
        } else {
            Err(IpcError::WouldBlock)
        };
        drop(transition);

        if result.is_err() {
            self.local.unlock_shared();
        }
        result
    }

    fn release_shared(&self) {
        let transition = self.transition.lock();
        let Ok(previous) = self
            .shared
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        else {
            drop(transition);
            warn!(
                "Shared release on {} without a shared hold",
                self.path.display()
            );
            return;
        };
        if previous == 1 {
            if let Err(e) = self.with_file(Flock::unlock_all) {
                warn!("Failed to unlock {}: {e}", self.path.display());
            }
        }
        drop(transition);
        self.local.unlock_shared();
    }

    fn close(&self) {
        self.local.lock_exclusive(AcquireMode::Blocking);
        let file = self.file.write().take();
        self.shared.store(0, Ordering::Release);
        self.local.unlock_exclusive();

        match file {
            Some(file) => {
                file.close();
                debug!("Closed flock mutex on {}", self.path.display());
            }
            None => debug!("Flock mutex on {} already closed", self.path.display()),
        }
    }
}
