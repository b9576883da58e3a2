//! Thin wrappers over the System V IPC and `flock` system calls.
//!
//! Each wrapper converts the C return convention into `io::Result`
//! and leaves error classification to the caller, which needs the raw
//! errno to tell `EINTR` and `EIDRM` apart.

use std::io;
use std::os::unix::io::RawFd;
use std::ptr::{self, NonNull};

use libc::{c_int, c_long, c_void, key_t, sembuf, shmid_ds};

fn check(ret: c_int) -> io::Result<c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Apply an advisory lock operation (`LOCK_SH`, `LOCK_EX`, `LOCK_UN`,
/// optionally `| LOCK_NB`) to an open descriptor.
#[allow(unsafe_code)]
pub fn flock(fd: RawFd, operation: c_int) -> io::Result<()> {
    check(unsafe { libc::flock(fd, operation) }).map(drop)
}

/// Get or create a semaphore set with `nsems` members.
#[allow(unsafe_code)]
pub fn semget(key: key_t, nsems: c_int, flags: c_int) -> io::Result<c_int> {
    check(unsafe { libc::semget(key, nsems, flags) })
}

/// Submit a batch of semaphore operations. The kernel applies all of
/// them atomically or none.
#[allow(unsafe_code)]
pub fn semop(semid: c_int, ops: &mut [sembuf]) -> io::Result<()> {
    check(unsafe { libc::semop(semid, ops.as_mut_ptr(), ops.len()) }).map(drop)
}

/// Read the value of semaphore `semnum`.
#[allow(unsafe_code)]
pub fn semctl_getval(semid: c_int, semnum: c_int) -> io::Result<c_int> {
    check(unsafe { libc::semctl(semid, semnum, libc::GETVAL) })
}

/// Remove a semaphore set, waking every waiter with `EIDRM`.
#[allow(unsafe_code)]
pub fn semctl_rmid(semid: c_int) -> io::Result<()> {
    check(unsafe { libc::semctl(semid, 0, libc::IPC_RMID) }).map(drop)
}

/// Get or create a shared memory segment.
#[allow(unsafe_code)]
pub fn shmget(key: key_t, size: usize, flags: c_int) -> io::Result<c_int> {
    check(unsafe { libc::shmget(key, size, flags) })
}

/// Attach a segment at a kernel-chosen address.
#[allow(unsafe_code)]
pub fn shmat(shmid: c_int, flags: c_int) -> io::Result<NonNull<u8>> {
    let addr = unsafe { libc::shmat(shmid, ptr::null(), flags) };
    if addr as isize == -1 {
        return Err(io::Error::last_os_error());
    }
    NonNull::new(addr.cast::<u8>()).ok_or_else(|| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Detach a segment previously returned by [`shmat`].
#[allow(unsafe_code)]
pub fn shmdt(addr: NonNull<u8>) -> io::Result<()> {
    check(unsafe { libc::shmdt(addr.as_ptr().cast::<c_void>().cast_const()) }).map(drop)
}

/// Issue a `shmctl` command that takes no buffer.
#[allow(unsafe_code)]
pub fn shmctl(shmid: c_int, cmd: c_int) -> io::Result<()> {
    check(unsafe { libc::shmctl(shmid, cmd, ptr::null_mut()) }).map(drop)
}

/// Read a segment's `shmid_ds` with `IPC_STAT`.
#[allow(unsafe_code)]
pub fn shmctl_stat(shmid: c_int) -> io::Result<shmid_ds> {
    let mut ds: shmid_ds = unsafe { std::mem::zeroed() };
    check(unsafe { libc::shmctl(shmid, libc::IPC_STAT, &raw mut ds) })?;
    Ok(ds)
}

/// Get or create a message queue.
#[allow(unsafe_code)]
pub fn msgget(key: key_t, flags: c_int) -> io::Result<c_int> {
    check(unsafe { libc::msgget(key, flags) })
}

/// Send `len` payload bytes from a `struct msgbuf`-shaped buffer.
///
/// # Safety
///
/// `msgp` must point to a `c_long` type field followed by at least
/// `len` readable bytes.
#[allow(unsafe_code)]
pub unsafe fn msgsnd(msqid: c_int, msgp: *const c_void, len: usize, flags: c_int) -> io::Result<()> {
    check(unsafe { libc::msgsnd(msqid, msgp, len, flags) }).map(drop)
}

/// Receive into a `struct msgbuf`-shaped buffer, returning the payload length.
///
/// # Safety
///
/// `msgp` must point to a `c_long` type field followed by at least
/// `max` writable bytes.
#[allow(unsafe_code)]
pub unsafe fn msgrcv(
    msqid: c_int,
    msgp: *mut c_void,
    max: usize,
    msgtyp: c_long,
    flags: c_int,
) -> io::Result<usize> {
    let n = unsafe { libc::msgrcv(msqid, msgp, max, msgtyp, flags) };
    usize::try_from(n).map_err(|_| io::Error::last_os_error())
}

/// Remove a message queue.
#[allow(unsafe_code)]
pub fn msgctl_rmid(msqid: c_int) -> io::Result<()> {
    check(unsafe { libc::msgctl(msqid, libc::IPC_RMID, ptr::null_mut()) }).map(drop)
}
