//! System V shared memory segments with a length-framed payload.
//!
//! `shmat` hands back a bare address with no size or provenance, so
//! [`ShmManager`] keeps a side table of what each attached address
//! belongs to. Writes are bounds-checked against that table.
//!
//! Frame layout:
//! - Offset 0x00: total frame length, `u32` big-endian (4 + payload length)
//! - Offset 0x04: payload bytes
//!
//! Every write re-stamps the prefix and every read trusts it, which
//! turns a segment into a single-slot mailbox. Bytes are always copied
//! in and out; no typed view of kernel memory is ever handed out.
//!
//! Reads and writes are not synchronised with other processes. Take a
//! lock from [`crate::lock`] around them.

use std::collections::HashMap;
use std::fmt;
use std::ptr::{self, NonNull};

use libc::c_int;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{IpcError, IpcFlags, ResourceKey, Result, sys};

/// Size of the big-endian length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Identifier of a shared memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShmId(c_int);

impl ShmId {
    /// Wrap a raw identifier, e.g. one received from another process.
    pub const fn from_raw(id: c_int) -> Self {
        Self(id)
    }

    /// Raw kernel identifier.
    pub const fn raw(self) -> c_int {
        self.0
    }
}

impl fmt::Display for ShmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A segment attached into this process.
///
/// Only [`ShmManager::attach`] creates one, and [`ShmManager::detach`]
/// consumes it, so a live `ShmAddr` always refers to mapped memory.
/// Dropping it without detaching leaves the mapping in place until the
/// process exits.
pub struct ShmAddr {
    ptr: NonNull<u8>,
    /// Segment size reported by the kernel at attach time.
    mapped: usize,
    read_only: bool,
}

impl ShmAddr {
    /// Start of the mapping.
    pub const fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Size of the mapped segment in bytes.
    pub const fn mapped_len(&self) -> usize {
        self.mapped
    }

    /// Whether the segment was attached with `SHM_RDONLY`.
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn key(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
}

impl fmt::Debug for ShmAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmAddr")
            .field("ptr", &self.ptr)
            .field("mapped", &self.mapped)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// SAFETY: ShmAddr only points at a kernel-managed shared mapping. Moving
// it between threads is fine; concurrent access to the bytes needs the
// same external locking other processes already require.
#[allow(unsafe_code)]
unsafe impl Send for ShmAddr {}

// SAFETY: see `Send`. All access goes through copying reads and writes.
#[allow(unsafe_code)]
unsafe impl Sync for ShmAddr {}

/// Administrative commands for [`ShmManager::control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmCommand {
    /// Mark the segment for destruction (`IPC_RMID`). The kernel frees
    /// it after the last detach.
    Remove,
    /// Prevent the segment from being swapped (`SHM_LOCK`).
    #[cfg(target_os = "linux")]
    Lock,
    /// Allow the segment to be swapped again (`SHM_UNLOCK`).
    #[cfg(target_os = "linux")]
    Unlock,
}

impl ShmCommand {
    const fn raw(self) -> c_int {
        match self {
            Self::Remove => libc::IPC_RMID,
            #[cfg(target_os = "linux")]
            Self::Lock => libc::SHM_LOCK,
            #[cfg(target_os = "linux")]
            Self::Unlock => libc::SHM_UNLOCK,
        }
    }
}

/// Segment status from `IPC_STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmStat {
    /// Segment size in bytes
    pub size: usize,
    /// Number of current attaches across all processes
    pub attach_count: u64,
    /// PID of the creator
    pub creator_pid: i32,
    /// PID of the last `shmat`/`shmdt`
    pub last_pid: i32,
}

#[derive(Debug, Default)]
struct ShmTables {
    /// Segment id -> declared size
    id_size: HashMap<ShmId, usize>,
    /// Attached address -> size
    addr_size: HashMap<usize, usize>,
    /// Attached address -> owning segment
    addr_id: HashMap<usize, ShmId>,
}

/// Registry of segments and attachments for one process.
///
/// Pass one manager to every segment operation. The side table is
/// guarded by a single rwlock: attach, detach, control and get take the
/// write side, capacity lookups during writes take the read side, and
/// reads take nothing.
#[derive(Debug, Default)]
pub struct ShmManager {
    tables: RwLock<ShmTables>,
}

impl ShmManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the segment for `key`, creating it when `flags` contains
    /// [`IpcFlags::CREATE`].
    ///
    /// A non-zero `size` is recorded as the segment's capacity. A zero
    /// `size` is a pure lookup and records nothing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `PermissionDenied`, `AlreadyExists` or the
    /// kernel's error when the key/size/flags combination is invalid.
    pub fn get(&self, key: ResourceKey, size: usize, flags: IpcFlags) -> Result<ShmId> {
        let id = sys::shmget(key.as_key_t(), size, flags.bits())
            .map(ShmId)
            .map_err(|e| IpcError::from_os("shmget", e))?;
        if size > 0 {
            self.tables.write().id_size.insert(id, size);
        }
        debug!("Got shm segment {id} for key {key} ({size} bytes)");
        Ok(id)
    }

    /// Map segment `id` into this process.
    ///
    /// The address is tracked only if `id`'s size was recorded by
    /// [`get`](Self::get) on this manager. An untracked address can be
    /// read but not written.
    pub fn attach(&self, id: ShmId, flags: IpcFlags) -> Result<ShmAddr> {
        let ptr = sys::shmat(id.0, flags.bits()).map_err(|e| IpcError::from_os("shmat", e))?;
        let mapped = match sys::shmctl_stat(id.0) {
            #[allow(clippy::unnecessary_cast)]
            Ok(ds) => ds.shm_segsz as usize,
            Err(e) => {
                unmap_after_failure(id, ptr);
                return Err(IpcError::from_os("shmctl", e));
            }
        };
        let addr = ShmAddr {
            ptr,
            mapped,
            read_only: flags.contains(IpcFlags::SHM_READ_ONLY),
        };

        let mut tables = self.tables.write();
        if let Some(&size) = tables.id_size.get(&id) {
            tables.addr_size.insert(addr.key(), size);
            tables.addr_id.insert(addr.key(), id);
        }
        drop(tables);

        debug!("Attached shm segment {id} at {:p} ({mapped} bytes)", addr.ptr);
        Ok(addr)
    }

    /// Unmap `addr`. The segment itself stays in the kernel.
    pub fn detach(&self, addr: ShmAddr) -> Result<()> {
        sys::shmdt(addr.ptr).map_err(|e| IpcError::from_os("shmdt", e))?;

        let mut tables = self.tables.write();
        tables.addr_size.remove(&addr.key());
        tables.addr_id.remove(&addr.key());
        drop(tables);

        debug!("Detached shm segment at {:p}", addr.ptr);
        Ok(())
    }

    /// Issue an administrative command for segment `id`.
    ///
    /// After a successful [`ShmCommand::Remove`] the segment's size and
    /// every address attached to it are dropped from the side table.
    /// Those addresses stay mapped until detached.
    pub fn control(&self, id: ShmId, command: ShmCommand) -> Result<()> {
        sys::shmctl(id.0, command.raw()).map_err(|e| IpcError::from_os("shmctl", e))?;
        if command != ShmCommand::Remove {
            return Ok(());
        }

        let mut tables = self.tables.write();
        tables.id_size.remove(&id);
        let ShmTables {
            addr_size, addr_id, ..
        } = &mut *tables;
        addr_id.retain(|addr, owner| {
            let keep = *owner != id;
            if !keep {
                addr_size.remove(addr);
            }
            keep
        });
        drop(tables);

        debug!("Removed shm segment {id}");
        Ok(())
    }

    /// Read segment status from the kernel.
    #[allow(clippy::unnecessary_cast)]
    pub fn stat(&self, id: ShmId) -> Result<ShmStat> {
        let ds = sys::shmctl_stat(id.0).map_err(|e| IpcError::from_os("shmctl", e))?;
        Ok(ShmStat {
            size: ds.shm_segsz as usize,
            attach_count: ds.shm_nattch as u64,
            creator_pid: ds.shm_cpid,
            last_pid: ds.shm_lpid,
        })
    }

    /// Write `data` as one frame at the start of `addr`.
    ///
    /// Nothing is written when the frame does not fit.
    ///
    /// # Errors
    ///
    /// - `ReadOnly` if the segment was attached read-only
    /// - `UnknownCapacity` if `addr` is not tracked by this manager
    /// - `InsufficientCapacity` if 4 + `data.len()` exceeds the capacity
    #[allow(unsafe_code)]
    pub fn write(&self, addr: &ShmAddr, data: &[u8]) -> Result<()> {
        if addr.read_only {
            return Err(IpcError::ReadOnly);
        }
        let capacity = self
            .tables
            .read()
            .addr_size
            .get(&addr.key())
            .copied()
            .ok_or(IpcError::UnknownCapacity)?;

        let capacity = capacity.min(addr.mapped);
        let required = FRAME_HEADER_LEN + data.len();
        let insufficient = IpcError::InsufficientCapacity { required, capacity };
        if required > capacity {
            return Err(insufficient);
        }
        let prefix = u32::try_from(required).map_err(|_| insufficient)?;

        // SAFETY: `addr` is attached read-write and `required` bytes fit
        // inside the mapping. Sources are process-private buffers.
        unsafe {
            let dst = addr.ptr.as_ptr();
            ptr::copy_nonoverlapping(prefix.to_be_bytes().as_ptr(), dst, FRAME_HEADER_LEN);
            ptr::copy_nonoverlapping(data.as_ptr(), dst.add(FRAME_HEADER_LEN), data.len());
        }
        Ok(())
    }

    /// Read the frame at the start of `addr` and return its payload.
    ///
    /// A prefix of 4 or less yields an empty payload.
    ///
    /// # Errors
    ///
    /// Returns `FrameOverrun` if the prefix claims more bytes than the
    /// segment holds.
    #[allow(unsafe_code)]
    pub fn read(&self, addr: &ShmAddr) -> Result<Vec<u8>> {
        if addr.mapped < FRAME_HEADER_LEN {
            return Ok(Vec::new());
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        // SAFETY: the mapping holds at least FRAME_HEADER_LEN bytes.
        unsafe {
            ptr::copy_nonoverlapping(addr.ptr.as_ptr(), header.as_mut_ptr(), FRAME_HEADER_LEN);
        }
        let declared = u32::from_be_bytes(header) as usize;
        if declared <= FRAME_HEADER_LEN {
            return Ok(Vec::new());
        }
        if declared > addr.mapped {
            return Err(IpcError::FrameOverrun {
                declared,
                mapped: addr.mapped,
            });
        }

        let mut payload = vec![0u8; declared - FRAME_HEADER_LEN];
        // SAFETY: `declared` bytes lie inside the mapping.
        unsafe {
            ptr::copy_nonoverlapping(
                addr.ptr.as_ptr().add(FRAME_HEADER_LEN),
                payload.as_mut_ptr(),
                payload.len(),
            );
        }
        Ok(payload)
    }

    /// Registered capacity of `addr`, if tracked.
    pub fn capacity(&self, addr: &ShmAddr) -> Option<usize> {
        self.tables.read().addr_size.get(&addr.key()).copied()
    }

    /// Segment `addr` was attached from, if tracked.
    pub fn segment_of(&self, addr: &ShmAddr) -> Option<ShmId> {
        self.tables.read().addr_id.get(&addr.key()).copied()
    }

    /// Size recorded for segment `id`, if any.
    pub fn registered_size(&self, id: ShmId) -> Option<usize> {
        self.tables.read().id_size.get(&id).copied()
    }

    /// Number of tracked attachments.
    pub fn tracked_addresses(&self) -> usize {
        self.tables.read().addr_id.len()
    }
}

/// Undo a mapping that failed to initialise. Returns `false` if the
/// unmap itself failed, which is logged.
fn unmap_after_failure(id: ShmId, ptr: NonNull<u8>) -> bool {
    match sys::shmdt(ptr) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to detach segment {id} at {ptr:p} after attach error: {e}");
            false
        }
    }
}
