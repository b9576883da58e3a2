//! System V IPC primitives for coordinating processes on one host.
//!
//! Unrelated processes agree on a resource by naming the same file, and
//! coordinate through kernel objects keyed by that file:
//!
//! - **Keys**: [`derive_key`] folds a path's inode and device plus a
//!   discriminator into a [`ResourceKey`]
//! - **Locks**: [`IpcLock`] with a `flock` backend ([`FlockMutex`]) and a
//!   semaphore-set backend ([`SemLock`]), built by [`Lock::open`]
//! - **Shared memory**: [`ShmManager`] attaches segments and moves
//!   length-framed payloads in and out of them
//! - **Message queues**: [`MessageQueue`] for callers that layer message
//!   passing on top
//!
//! Locks and segments are independent. A writer takes the write lock,
//! writes through the manager and releases; readers do the same with
//! the read lock. Nothing enforces that every process follows this
//! discipline.
//!
//! # Example
//!
//! ```rust,no_run
//! use cascette_ipc::{IpcConfig, IpcFlags, IpcLock, Lock, ShmManager, derive_key};
//!
//! # fn example() -> cascette_ipc::Result<()> {
//! let path = "/var/run/myapp.lock";
//! let lock = Lock::open(path, &IpcConfig::default())?;
//!
//! let shm = ShmManager::new();
//! let id = shm.get(derive_key(path, 1)?, 4096, IpcFlags::CREATE | IpcFlags::READ_WRITE)?;
//! let addr = shm.attach(id, IpcFlags::NONE)?;
//!
//! {
//!     let _guard = lock.write()?;
//!     shm.write(&addr, b"hello")?;
//! }
//!
//! let _guard = lock.read()?;
//! assert_eq!(shm.read(&addr)?, b"hello");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![cfg(unix)]

// Error types
pub mod error;

// Key derivation
pub mod key;

// Kernel flag constants
pub mod flags;

// Cross-process locks
pub mod lock;

// Shared memory segments
pub mod shm;

// Message queues
pub mod msg;

// Configuration
pub mod config;

// System call wrappers
mod sys;

pub use config::IpcConfig;
pub use error::{IpcError, Result};
pub use flags::IpcFlags;
pub use key::{ResourceKey, derive_key};
pub use lock::{AcquireMode, Flock, FlockMutex, IpcLock, Lock, LockKind, SemLock};
pub use msg::{MSG_MAX_SIZE, MessageQueue};
pub use shm::{ShmAddr, ShmCommand, ShmId, ShmManager, ShmStat};

/// Version information for the IPC crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
