//! # Synchronous Bridge
//!
//! Public calls such as `count()` look synchronous to the caller, while the
//! real work happens on the coordinator thread. The bridge pairs a
//! single-slot [`ReplySender`] travelling inside the message with a
//! [`ReplyReceiver`] the caller blocks on.
//!
//! ## Guarantees
//! - `ReplySender::send` consumes the sender, so a result is set at most once
//! - if the message is dropped without a reply (coordinator fault, mailbox
//!   closed on shutdown) the receiver wakes with [`ReplyError::Dropped`]
//!   instead of blocking forever
//! - a late reply after a timeout is discarded

use std::fmt;
use std::time::Duration;

use flume::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

/// Why a bridged call returned without a value.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyError {
    #[error("no reply within {0:?}")]
    Timeout(Duration),
    #[error("request dropped before a reply was sent")]
    Dropped,
}

/// Sending half of the bridge; travels inside a message.
pub struct ReplySender<T>(Sender<T>);

impl<T> ReplySender<T> {
    /// Delivers the reply. Returns false if the caller stopped waiting.
    pub fn send(self, value: T) -> bool {
        self.0.send(value).is_ok()
    }
}

impl<T> fmt::Debug for ReplySender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySender")
            .field("waiting", &(self.0.receiver_count() > 0))
            .finish()
    }
}

/// Receiving half of the bridge; held by the blocked caller.
pub struct ReplyReceiver<T>(Receiver<T>);

impl<T> ReplyReceiver<T> {
    /// Blocks until the reply arrives, the request is dropped, or the
    /// optional timeout elapses.
    pub fn wait(self, timeout: Option<Duration>) -> Result<T, ReplyError> {
        match timeout {
            None => self.0.recv().map_err(|_| ReplyError::Dropped),
            Some(limit) => self.0.recv_timeout(limit).map_err(|err| match err {
                RecvTimeoutError::Timeout => ReplyError::Timeout(limit),
                RecvTimeoutError::Disconnected => ReplyError::Dropped,
            }),
        }
    }

    /// Returns the reply if it already arrived.
    pub fn try_take(&self) -> Option<T> {
        self.0.try_recv().ok()
    }
}

impl<T> fmt::Debug for ReplyReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyReceiver")
            .field("ready", &!self.0.is_empty())
            .finish()
    }
}

/// Creates a connected one-shot reply pair.
pub fn reply_channel<T>() -> (ReplySender<T>, ReplyReceiver<T>) {
    let (tx, rx) = flume::bounded(1);
    (ReplySender(tx), ReplyReceiver(rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_reply_crosses_threads() {
        let (tx, rx) = reply_channel::<usize>();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            tx.send(42)
        });
        assert_eq!(rx.wait(None), Ok(42));
        assert!(handle.join().unwrap());
    }

    #[test]
    fn test_dropped_sender_releases_waiter() {
        let (tx, rx) = reply_channel::<usize>();
        thread::spawn(move || drop(tx));
        assert_eq!(rx.wait(None), Err(ReplyError::Dropped));
    }

    #[test]
    fn test_timeout_then_late_reply_is_discarded() {
        let (tx, rx) = reply_channel::<usize>();
        let limit = Duration::from_millis(20);
        assert_eq!(rx.wait(Some(limit)), Err(ReplyError::Timeout(limit)));
        assert!(!tx.send(1));
    }

    #[test]
    fn test_try_take() {
        let (tx, rx) = reply_channel::<&str>();
        assert_eq!(rx.try_take(), None);
        tx.send("done");
        assert_eq!(rx.try_take(), Some("done"));
    }
}
