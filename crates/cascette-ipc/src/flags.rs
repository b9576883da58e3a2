//! Permission and creation flags for the kernel IPC calls.
//!
//! Values come straight from the host's `libc` definitions, so they
//! match the kernel ABI bit for bit. Flags combine with `|`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use libc::c_int;

/// Flag word passed verbatim to `semget`, `shmget`, `shmat` and the
/// message queue calls.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IpcFlags(c_int);

impl IpcFlags {
    /// No flags: look up an existing object.
    pub const NONE: Self = Self(0);

    /// Owner read permission (`0400`).
    pub const READ: Self = Self(0o400);
    /// Owner write permission (`0200`).
    pub const WRITE: Self = Self(0o200);
    /// Owner read and write permission (`0600`).
    pub const READ_WRITE: Self = Self(0o600);

    /// Create the object if the key does not exist (`IPC_CREAT`).
    pub const CREATE: Self = Self(libc::IPC_CREAT);
    /// Fail if the key already exists; used with `CREATE` (`IPC_EXCL`).
    pub const EXCLUSIVE: Self = Self(libc::IPC_EXCL);
    /// Return instead of waiting (`IPC_NOWAIT`).
    pub const NO_WAIT: Self = Self(libc::IPC_NOWAIT);

    /// Attach the segment read-only (`SHM_RDONLY`).
    pub const SHM_READ_ONLY: Self = Self(libc::SHM_RDONLY);
    /// Round the attach address down to `SHMLBA` (`SHM_RND`).
    pub const SHM_ROUND: Self = Self(libc::SHM_RND);
    /// Replace any existing mapping at the attach address (`SHM_REMAP`).
    #[cfg(target_os = "linux")]
    pub const SHM_REMAP: Self = Self(libc::SHM_REMAP);
    /// Allow execution of the segment contents (`SHM_EXEC`).
    #[cfg(target_os = "linux")]
    pub const SHM_EXEC: Self = Self(libc::SHM_EXEC);

    /// Receive a truncated message instead of failing (`MSG_NOERROR`).
    pub const MSG_NO_ERROR: Self = Self(libc::MSG_NOERROR);

    /// Permission bits from an octal mode such as `0o600`.
    ///
    /// Only the low nine bits are kept.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn permissions(mode: u32) -> Self {
        Self((mode & 0o777) as c_int)
    }

    /// Wrap a raw flag word.
    pub const fn from_bits(bits: c_int) -> Self {
        Self(bits)
    }

    /// Raw flag word.
    pub const fn bits(self) -> c_int {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// These flags with the bits of `other` cleared.
    #[must_use]
    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }
}

impl BitOr for IpcFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for IpcFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for IpcFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IpcFlags({:#o})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_values() {
        // Linux generic IPC ABI
        #[cfg(target_os = "linux")]
        {
            assert_eq!(IpcFlags::CREATE.bits(), 0o1000);
            assert_eq!(IpcFlags::EXCLUSIVE.bits(), 0o2000);
            assert_eq!(IpcFlags::NO_WAIT.bits(), 0o4000);
            assert_eq!(IpcFlags::SHM_READ_ONLY.bits(), 0o10000);
            assert_eq!(IpcFlags::SHM_REMAP.bits(), 0o40000);
        }
        assert_eq!(IpcFlags::READ_WRITE, IpcFlags::READ | IpcFlags::WRITE);
    }

    #[test]
    fn test_combine_and_contains() {
        let mut flags = IpcFlags::CREATE | IpcFlags::permissions(0o600);
        assert!(flags.contains(IpcFlags::CREATE));
        assert!(flags.contains(IpcFlags::READ_WRITE));
        assert!(!flags.contains(IpcFlags::EXCLUSIVE));

        flags |= IpcFlags::EXCLUSIVE;
        assert!(flags.contains(IpcFlags::CREATE | IpcFlags::EXCLUSIVE));
        assert!(!flags.without(IpcFlags::EXCLUSIVE).contains(IpcFlags::EXCLUSIVE));
    }

    #[test]
    fn test_permissions_mask() {
        assert_eq!(IpcFlags::permissions(0o1777).bits(), 0o777);
    }
}
