//! Error types for IPC operations

use std::io;

use thiserror::Error;

/// Result type for IPC operations.
pub type Result<T> = std::result::Result<T, IpcError>;

/// Errors that can occur during IPC operations.
///
/// Signal interruptions and a semaphore set disappearing mid-use never
/// show up here; both are handled inside the lock implementations.
#[derive(Debug, Error)]
pub enum IpcError {
    /// A non-blocking acquire could not proceed immediately.
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// The path, segment, semaphore set or queue does not exist.
    #[error("{op}: not found")]
    NotFound {
        /// Operation that failed
        op: &'static str,
    },

    /// The caller lacks permission for the requested access.
    #[error("{op}: permission denied")]
    PermissionDenied {
        /// Operation that failed
        op: &'static str,
    },

    /// Exclusive creation collided with an existing object.
    #[error("{op}: already exists")]
    AlreadyExists {
        /// Operation that failed
        op: &'static str,
    },

    /// A framed write does not fit in the registered segment size.
    #[error("not enough space: framed size {required} exceeds capacity {capacity}")]
    InsufficientCapacity {
        /// Framed size in bytes (4 + payload length)
        required: usize,
        /// Registered segment size in bytes
        capacity: usize,
    },

    /// The address is attached but was never registered with a size.
    #[error("unknown capacity: address is attached but not tracked")]
    UnknownCapacity,

    /// The segment was attached read-only.
    #[error("segment is attached read-only")]
    ReadOnly,

    /// A length prefix points past the end of the mapped segment.
    #[error("length prefix {declared} exceeds mapped segment size {mapped}")]
    FrameOverrun {
        /// Length recorded in the prefix
        declared: usize,
        /// Size of the mapping
        mapped: usize,
    },

    /// A message payload is larger than the queue's fixed maximum.
    #[error("message length {len} exceeds maximum {max}")]
    MessageTooLarge {
        /// Payload length in bytes
        len: usize,
        /// Maximum payload length in bytes
        max: usize,
    },

    /// Message types must be strictly positive when sending.
    #[error("message type must be positive")]
    InvalidMessageType,

    /// The lock handle has already been closed.
    #[error("lock handle is closed")]
    Closed,

    /// Any other error reported by the kernel.
    #[error("{op} failed: {source}")]
    Kernel {
        /// Operation that failed
        op: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

impl IpcError {
    /// Classify an OS error returned by `op`.
    pub fn from_os(op: &'static str, err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::EAGAIN | libc::ENOMSG) => Self::WouldBlock,
            Some(libc::ENOENT) => Self::NotFound { op },
            Some(libc::EACCES | libc::EPERM) => Self::PermissionDenied { op },
            Some(libc::EEXIST) => Self::AlreadyExists { op },
            _ => match err.kind() {
                io::ErrorKind::NotFound => Self::NotFound { op },
                io::ErrorKind::PermissionDenied => Self::PermissionDenied { op },
                _ => Self::Kernel { op, source: err },
            },
        }
    }

    /// Whether this is a non-blocking acquire that could not proceed.
    pub const fn is_would_block(&self) -> bool {
        matches!(self, Self::WouldBlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_classification() {
        let cases = [
            (libc::EAGAIN, "WouldBlock"),
            (libc::ENOMSG, "WouldBlock"),
            (libc::ENOENT, "NotFound"),
            (libc::EACCES, "PermissionDenied"),
            (libc::EPERM, "PermissionDenied"),
            (libc::EEXIST, "AlreadyExists"),
            (libc::EINVAL, "Kernel"),
        ];

        for (errno, expected) in cases {
            let err = IpcError::from_os("semget", io::Error::from_raw_os_error(errno));
            let name = format!("{err:?}");
            assert!(
                name.starts_with(expected),
                "errno {errno} classified as {name}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_kernel_error_keeps_source() {
        let err = IpcError::from_os("shmat", io::Error::from_raw_os_error(libc::EINVAL));
        assert!(err.to_string().starts_with("shmat failed:"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_kind_fallback() {
        let err = IpcError::from_os(
            "derive_key",
            io::Error::new(io::ErrorKind::NotFound, "missing"),
        );
        assert!(matches!(err, IpcError::NotFound { op: "derive_key" }));
    }
}
