//! Resource key derivation from filesystem paths.
//!
//! Two processes that name the same existing file with the same
//! discriminator compute the same key, which they then hand to
//! `semget`, `shmget` or `msgget`.
//!
//! Key layout (low to high):
//! - Bits 0..16: low 16 bits of the inode number
//! - Bits 16..24: low 8 bits of the device number
//! - Bits 24..32: discriminator
//!
//! The key follows the file's inode. Removing and recreating the file
//! usually yields a different key, so processes must agree on a file
//! that outlives them.

use std::fmt;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::{IpcError, Result};

/// Key identifying a kernel IPC object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

impl ResourceKey {
    /// `IPC_PRIVATE`: always creates a new object visible only through
    /// its identifier.
    pub const PRIVATE: Self = Self(libc::IPC_PRIVATE as u64);

    /// Wrap a raw key value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit key value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Key in the form the kernel calls take.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_key_t(self) -> libc::key_t {
        self.0 as u32 as libc::key_t
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Derive a resource key from `path` and a small discriminator.
///
/// # Errors
///
/// Returns `NotFound` or `PermissionDenied` if the path cannot be stat'ed.
pub fn derive_key<P: AsRef<Path>>(path: P, discriminator: u8) -> Result<ResourceKey> {
    let meta = std::fs::metadata(path.as_ref()).map_err(|e| IpcError::from_os("stat", e))?;
    Ok(fold_key(meta.ino(), meta.dev(), discriminator))
}

const fn fold_key(ino: u64, dev: u64, discriminator: u8) -> ResourceKey {
    ResourceKey((ino & 0xFFFF) | ((dev & 0xFF) << 16) | ((discriminator as u64) << 24))
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fold_key_layout() {
        let key = fold_key(0x0012_3456, 0xAB_CD, 0x7F);
        assert_eq!(key.raw(), 0x7FCD_3456);
    }

    #[test]
    fn test_derive_key_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("lock");
        std::fs::write(&path, b"").expect("write");

        let a = derive_key(&path, 5).expect("key");
        let b = derive_key(&path, 5).expect("key");
        assert_eq!(a, b);
        assert_ne!(a, derive_key(&path, 6).expect("key"));
    }

    #[test]
    fn test_derive_key_distinct_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = dir.path().join("a");
        let second = dir.path().join("b");
        std::fs::write(&first, b"").expect("write");
        std::fs::write(&second, b"").expect("write");

        assert_ne!(
            derive_key(&first, 1).expect("key"),
            derive_key(&second, 1).expect("key")
        );
    }

    #[test]
    fn test_derive_key_missing_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = derive_key(dir.path().join("missing"), 0).expect_err("missing path");
        assert!(matches!(err, IpcError::NotFound { .. }));
    }

    #[test]
    fn test_as_key_t_high_discriminator() {
        let key = fold_key(1, 0, 0xFF);
        assert_eq!(key.as_key_t() as u32, 0xFF00_0001);
    }

    proptest! {
        #[test]
        fn prop_fold_key_fields(ino in any::<u64>(), dev in any::<u64>(), disc in any::<u8>()) {
            let key = fold_key(ino, dev, disc).raw();
            prop_assert_eq!(key & 0xFFFF, ino & 0xFFFF);
            prop_assert_eq!((key >> 16) & 0xFF, dev & 0xFF);
            prop_assert_eq!(key >> 24, u64::from(disc));
        }
    }
}
