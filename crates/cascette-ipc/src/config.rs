//! Configuration for lock construction

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::LockKind;

/// Configuration for building locks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Lock backend to build
    pub lock_kind: LockKind,

    /// Discriminator mixed into the key derived from the lock path
    pub discriminator: u8,

    /// Permission bits for created kernel objects
    pub permissions: u32,

    /// Delay before retrying a semaphore batch that failed unexpectedly
    pub retry_delay_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            lock_kind: LockKind::Semaphore,
            discriminator: 0,
            permissions: 0o600,
            retry_delay_ms: 1,
        }
    }
}

impl IpcConfig {
    /// Create a configuration for the given backend
    pub fn new(lock_kind: LockKind) -> Self {
        Self {
            lock_kind,
            ..Default::default()
        }
    }

    /// Set the lock backend
    #[must_use]
    pub const fn with_lock_kind(mut self, lock_kind: LockKind) -> Self {
        self.lock_kind = lock_kind;
        self
    }

    /// Set the key discriminator
    #[must_use]
    pub const fn with_discriminator(mut self, discriminator: u8) -> Self {
        self.discriminator = discriminator;
        self
    }

    /// Set the permission bits for created objects
    #[must_use]
    pub const fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Set the semaphore retry delay
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Semaphore retry delay as a `Duration`
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IpcConfig::default();
        assert_eq!(config.lock_kind, LockKind::Semaphore);
        assert_eq!(config.permissions, 0o600);
        assert_eq!(config.retry_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_builder() {
        let config = IpcConfig::new(LockKind::Flock)
            .with_discriminator(9)
            .with_permissions(0o660)
            .with_retry_delay(Duration::from_millis(5));
        assert_eq!(config.lock_kind, LockKind::Flock);
        assert_eq!(config.discriminator, 9);
        assert_eq!(config.permissions, 0o660);
        assert_eq!(config.retry_delay_ms, 5);
    }

    #[test]
    fn test_partial_json() {
        let config: IpcConfig =
            serde_json::from_str(r#"{"lock_kind": "flock", "discriminator": 5}"#).expect("parse");
        assert_eq!(config.lock_kind, LockKind::Flock);
        assert_eq!(config.discriminator, 5);
        assert_eq!(config.permissions, 0o600);

        let json = serde_json::to_string(&config).expect("serialize");
        let back: IpcConfig = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, config);
    }
}
