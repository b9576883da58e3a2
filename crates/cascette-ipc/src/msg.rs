//! System V message queues.
//!
//! A straight pass-through to `msgget`/`msgsnd`/`msgrcv`/`msgctl` with a
//! fixed maximum payload size.

use libc::{c_int, c_long, c_void};
use tracing::debug;

use crate::{IpcError, IpcFlags, ResourceKey, Result, sys};

/// Largest payload a single message may carry.
pub const MSG_MAX_SIZE: usize = 1 << 13;

/// `struct msgbuf` with a fixed-size text area.
#[repr(C)]
struct MessageBuffer {
    mtype: c_long,
    mtext: [u8; MSG_MAX_SIZE],
}

impl MessageBuffer {
    fn boxed(mtype: c_long) -> Box<Self> {
        Box::new(Self {
            mtype,
            mtext: [0; MSG_MAX_SIZE],
        })
    }
}

/// Handle to a kernel message queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageQueue {
    id: c_int,
}

impl MessageQueue {
    /// Get the queue for `key`, creating it when `flags` contains
    /// [`IpcFlags::CREATE`].
    pub fn get(key: ResourceKey, flags: IpcFlags) -> Result<Self> {
        let id = sys::msgget(key.as_key_t(), flags.bits())
            .map_err(|e| IpcError::from_os("msgget", e))?;
        debug!("Got message queue {id} for key {key}");
        Ok(Self { id })
    }

    /// Wrap a raw queue identifier.
    pub const fn from_raw(id: c_int) -> Self {
        Self { id }
    }

    /// Raw kernel identifier.
    pub const fn id(&self) -> c_int {
        self.id
    }

    /// Send `data` as a message of type `mtype`.
    ///
    /// Blocks while the queue is full unless `flags` contains
    /// [`IpcFlags::NO_WAIT`].
    ///
    /// # Errors
    ///
    /// Returns `InvalidMessageType` for a non-positive type and
    /// `MessageTooLarge` for payloads above [`MSG_MAX_SIZE`].
    #[allow(unsafe_code)]
    pub fn send(&self, mtype: i64, data: &[u8], flags: IpcFlags) -> Result<()> {
        if mtype <= 0 {
            return Err(IpcError::InvalidMessageType);
        }
        if data.len() > MSG_MAX_SIZE {
            return Err(IpcError::MessageTooLarge {
                len: data.len(),
                max: MSG_MAX_SIZE,
            });
        }

        let mut buf = MessageBuffer::boxed(mtype as c_long);
        buf.mtext[..data.len()].copy_from_slice(data);
        let msgp = std::ptr::from_ref::<MessageBuffer>(&*buf).cast::<c_void>();

        loop {
            // SAFETY: `msgp` points to a `MessageBuffer`, whose text area
            // holds at least `data.len()` bytes.
            match unsafe { sys::msgsnd(self.id, msgp, data.len(), flags.bits()) } {
                Ok(()) => break,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(IpcError::from_os("msgsnd", e)),
            }
        }
        debug!("Sent {} byte message of type {mtype} on queue {}", data.len(), self.id);
        Ok(())
    }

    /// Receive a message.
    ///
    /// `mtype` follows `msgrcv`: 0 takes the first message, a positive
    /// value the first message of that type, a negative value the first
    /// message with the lowest type not above its absolute value.
    ///
    /// # Errors
    ///
    /// Returns `WouldBlock` when [`IpcFlags::NO_WAIT`] is set and no
    /// matching message is queued.
    #[allow(unsafe_code)]
    pub fn receive(&self, mtype: i64, flags: IpcFlags) -> Result<Vec<u8>> {
        let mut buf = MessageBuffer::boxed(0);
        let msgp = std::ptr::from_mut::<MessageBuffer>(&mut *buf).cast::<c_void>();

        let len = loop {
            // SAFETY: `msgp` points to a `MessageBuffer` with
            // MSG_MAX_SIZE writable bytes of text.
            match unsafe { sys::msgrcv(self.id, msgp, MSG_MAX_SIZE, mtype as c_long, flags.bits()) } {
                Ok(len) => break len,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(IpcError::from_os("msgrcv", e)),
            }
        };
        debug!("Received {len} byte message of type {} on queue {}", buf.mtype, self.id);
        Ok(buf.mtext[..len].to_vec())
    }

    /// Remove the queue, failing every blocked sender and receiver.
    pub fn remove(self) -> Result<()> {
        sys::msgctl_rmid(self.id).map_err(|e| IpcError::from_os("msgctl", e))?;
        debug!("Removed message queue {}", self.id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn private_queue() -> MessageQueue {
        MessageQueue::get(ResourceKey::PRIVATE, IpcFlags::CREATE | IpcFlags::READ_WRITE)
            .expect("msgget")
    }

    #[test]
    fn test_send_and_receive() {
        let queue = private_queue();
        let want = "1".repeat(128);

        queue.send(1, want.as_bytes(), IpcFlags::NONE).expect("send");
        let got = queue.receive(0, IpcFlags::NO_WAIT).expect("receive");
        assert_eq!(got, want.as_bytes());

        queue.remove().expect("remove");
    }

    #[test]
    fn test_receive_by_type() {
        let queue = private_queue();
        queue.send(1, b"first", IpcFlags::NONE).expect("send");
        queue.send(2, b"second", IpcFlags::NONE).expect("send");

        assert_eq!(queue.receive(2, IpcFlags::NO_WAIT).expect("type 2"), b"second");
        assert_eq!(queue.receive(0, IpcFlags::NO_WAIT).expect("any"), b"first");

        queue.remove().expect("remove");
    }

    #[test]
    fn test_empty_queue_would_block() {
        let queue = private_queue();
        let err = queue.receive(0, IpcFlags::NO_WAIT).expect_err("empty");
        assert!(err.is_would_block());
        queue.remove().expect("remove");
    }

    #[test]
    fn test_send_validation() {
        let queue = private_queue();
        assert!(matches!(
            queue.send(0, b"x", IpcFlags::NONE),
            Err(IpcError::InvalidMessageType)
        ));
        assert!(matches!(
            queue.send(1, &vec![0; MSG_MAX_SIZE + 1], IpcFlags::NONE),
            Err(IpcError::MessageTooLarge { .. })
        ));
        queue.send(1, &vec![7; MSG_MAX_SIZE], IpcFlags::NO_WAIT).expect("max size");
        assert_eq!(
            queue.receive(1, IpcFlags::NO_WAIT).expect("receive").len(),
            MSG_MAX_SIZE
        );
        queue.remove().expect("remove");
    }
}
