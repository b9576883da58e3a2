//! Reader/writer lock on a two-member System V semaphore set.
//!
//! Semaphore 0 is the writer gate, semaphore 1 counts active readers.
//! Every acquire and release is a single `semop` batch, so the kernel
//! applies it entirely or not at all:
//!
//! | Operation     | Batch                                  |
//! |---------------|----------------------------------------|
//! | acquire write | wait sem1 == 0, wait sem0 == 0, sem0 += 1 |
//! | release write | sem0 -= 1                              |
//! | acquire read  | wait sem0 == 0, sem1 += 1              |
//! | release read  | sem1 -= 1                              |
//!
//! All operations carry `SEM_UNDO`, so the kernel reverts a holder's
//! adjustments when its process exits without releasing.
//!
//! The set has no reference count. [`close`](IpcLock::close) removes it
//! for every process. A handle whose set has disappeared falls back to
//! an in-process rwlock for good: still correct between its own
//! threads, but no longer coordinated with other processes.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use libc::{c_int, c_short, sembuf};
use tracing::{debug, warn};

use super::local::LocalRwLock;
use super::{AcquireMode, IpcLock};
use crate::{IpcConfig, IpcError, IpcFlags, ResourceKey, Result, sys};

const WRITER_GATE: u16 = 0;
const READER_COUNT: u16 = 1;
const SEM_COUNT: c_int = 2;

#[allow(clippy::cast_possible_truncation)]
const fn op(sem_num: u16, sem_op: c_short) -> sembuf {
    sembuf {
        sem_num,
        sem_op,
        sem_flg: libc::SEM_UNDO as c_short,
    }
}

const ACQUIRE_WRITE: [sembuf; 3] = [op(READER_COUNT, 0), op(WRITER_GATE, 0), op(WRITER_GATE, 1)];
const RELEASE_WRITE: [sembuf; 1] = [op(WRITER_GATE, -1)];
const ACQUIRE_READ: [sembuf; 2] = [op(WRITER_GATE, 0), op(READER_COUNT, 1)];
const RELEASE_READ: [sembuf; 1] = [op(READER_COUNT, -1)];

#[allow(clippy::cast_possible_truncation)]
fn no_wait<const N: usize>(mut batch: [sembuf; N]) -> [sembuf; N] {
    for sop in &mut batch {
        sop.sem_flg |= libc::IPC_NOWAIT as c_short;
    }
    batch
}

/// The set was removed while this handle still referred to it.
fn is_invalidated(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL | libc::EIDRM))
}

/// Current values of the two semaphores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SemState {
    /// Writer gate: 1 while a writer holds the lock
    pub writers: u32,
    /// Number of active readers
    pub readers: u32,
}

/// Reader/writer lock shared between processes through a semaphore set.
pub struct SemLock {
    id: c_int,
    key: ResourceKey,
    retry_delay: Duration,
    /// Set once the kernel object is gone.
    degraded: AtomicBool,
    local: LocalRwLock,
    local_writers: AtomicUsize,
    local_readers: AtomicUsize,
}

impl SemLock {
    /// Create the semaphore set for `key`, or attach to it if another
    /// process created it first. Created sets are owner read/write.
    pub fn new(key: ResourceKey) -> Result<Self> {
        Self::with_config(key, &IpcConfig::default())
    }

    /// Like [`new`](Self::new), taking permissions and the retry delay
    /// from `config`.
    ///
    /// Both semaphores start at the kernel's initial value of zero; no
    /// explicit initialisation is issued.
    pub fn with_config(key: ResourceKey, config: &IpcConfig) -> Result<Self> {
        let create =
            IpcFlags::CREATE | IpcFlags::EXCLUSIVE | IpcFlags::permissions(config.permissions);
        let id = match sys::semget(key.as_key_t(), SEM_COUNT, create.bits()) {
            Ok(id) => {
                debug!("Created semaphore set {id} for key {key}");
                id
            }
            Err(e) if e.raw_os_error() == Some(libc::EEXIST) => {
                let id = sys::semget(key.as_key_t(), SEM_COUNT, 0)
                    .map_err(|e| IpcError::from_os("semget", e))?;
                debug!("Attached to semaphore set {id} for key {key}");
                id
            }
            Err(e) => return Err(IpcError::from_os("semget", e)),
        };

        Ok(Self {
            id,
            key,
            retry_delay: config.retry_delay(),
            degraded: AtomicBool::new(false),
            local: LocalRwLock::new(),
            local_writers: AtomicUsize::new(0),
            local_readers: AtomicUsize::new(0),
        })
    }

    /// Kernel identifier of the semaphore set.
    pub const fn id(&self) -> c_int {
        self.id
    }

    /// Key the set was created or looked up with.
    pub const fn key(&self) -> ResourceKey {
        self.key
    }

    /// Whether this handle has fallen back to the in-process lock.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    /// Read both semaphore values.
    pub fn values(&self) -> Result<SemState> {
        let get = |num: u16| {
            sys::semctl_getval(self.id, c_int::from(num))
                .map(|v| u32::try_from(v).unwrap_or(0))
                .map_err(|e| IpcError::from_os("semctl", e))
        };
        Ok(SemState {
            writers: get(WRITER_GATE)?,
            readers: get(READER_COUNT)?,
        })
    }

    fn degrade(&self) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(
                "Semaphore set {} for key {} is gone, falling back to in-process locking",
                self.id, self.key
            );
        }
    }

    fn acquire<const N: usize>(
        &self,
        batch: [sembuf; N],
        exclusive: bool,
        mode: AcquireMode,
    ) -> Result<()> {
        if !self.is_degraded() {
            let mut ops = match mode {
                AcquireMode::Blocking => batch,
                AcquireMode::NonBlocking => no_wait(batch),
            };
            let mut reported = false;
            loop {
                match sys::semop(self.id, &mut ops) {
                    Ok(()) => return Ok(()),
                    Err(e) => match e.raw_os_error() {
                        Some(libc::EINTR) => {}
                        Some(libc::EAGAIN) => return Err(IpcError::WouldBlock),
                        _ if is_invalidated(&e) => {
                            self.degrade();
                            break;
                        }
                        _ if mode == AcquireMode::NonBlocking => {
                            return Err(IpcError::from_os("semop", e));
                        }
                        _ => {
                            if !reported {
                                warn!("semop on set {} failed, retrying: {e}", self.id);
                                reported = true;
                            }
                            thread::sleep(self.retry_delay);
                        }
                    },
                }
            }
        }
        self.acquire_local(exclusive, mode)
    }

    fn acquire_local(&self, exclusive: bool, mode: AcquireMode) -> Result<()> {
        let (locked, holders) = if exclusive {
            (self.local.lock_exclusive(mode), &self.local_writers)
        } else {
            (self.local.lock_shared(mode), &self.local_readers)
        };
        if !locked {
            return Err(IpcError::WouldBlock);
        }
        holders.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn release<const N: usize>(&self, batch: [sembuf; N], exclusive: bool) {
        let holders = if exclusive {
            &self.local_writers
        } else {
            &self.local_readers
        };
        let held_locally = holders
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if held_locally {
            if exclusive {
                self.local.unlock_exclusive();
            } else {
                self.local.unlock_shared();
            }
            return;
        }

        // A release never waits: decrementing a zero semaphore means the
        // caller did not hold the lock.
        let mut ops = no_wait(batch);
        loop {
            match sys::semop(self.id, &mut ops) {
                Ok(()) => return,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => {
                    warn!("Error releasing semaphore set {}: {e}", self.id);
                    if is_invalidated(&e) {
                        self.degrade();
                    }
                    return;
                }
            }
        }
    }
}

impl IpcLock for SemLock {
    fn acquire_exclusive(&self, mode: AcquireMode) -> Result<()> {
        self.acquire(ACQUIRE_WRITE, true, mode)
    }

    fn release_exclusive(&self) {
        self.release(RELEASE_WRITE, true);
    }

    fn acquire_shared(&self, mode: AcquireMode) -> Result<()> {
        self.acquire(ACQUIRE_READ, false, mode)
    }

    fn release_shared(&self) {
        self.release(RELEASE_READ, false);
    }

    fn close(&self) {
        match sys::semctl_rmid(self.id) {
            Ok(()) => debug!("Removed semaphore set {} for key {}", self.id, self.key),
            Err(e) => warn!("Error removing semaphore set {}: {e}", self.id),
        }
    }
}

impl std::fmt::Debug for SemLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemLock")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("degraded", &self.is_degraded())
            .finish_non_exhaustive()
    }
}
