//! # Priority Mailbox
//!
//! The coordinator's single inbox. Producers on any thread post messages;
//! only the coordinator thread consumes them.
//!
//! ## Key Concepts
//! - One lock-free lane per priority level; the consumer always drains the
//!   highest non-empty lane first, FIFO within a lane
//! - A doorbell channel wakes the consumer when something was posted, and
//!   lets it sleep until an optional deadline
//! - Closing is final: later posts fail with [`MailboxError::Closed`] and
//!   anything still queued is dropped, releasing reply senders inside it
//!
//! ## Thread Safety
//! `post` may race with `close`. A poster re-checks the closed flag after
//! pushing and drains the lanes itself if it lost the race, so no message
//! outlives a closed mailbox.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crossbeam_queue::SegQueue;
use flume::{Receiver, RecvTimeoutError, Sender};
use jobqueue_api::priority;

use crate::thread::error::MailboxError;
use crate::thread::message::Message;

pub struct PriorityMailbox {
    /// Indexed like [`priority::LEVELS`], highest first.
    lanes: [SegQueue<Message>; priority::LEVELS.len()],
    doorbell: Sender<()>,
    wakeups: Receiver<()>,
    closed: AtomicBool,
}

impl fmt::Debug for PriorityMailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriorityMailbox")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Default for PriorityMailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityMailbox {
    pub fn new() -> Self {
        let (doorbell, wakeups) = flume::unbounded();
        Self {
            lanes: std::array::from_fn(|_| SegQueue::new()),
            doorbell,
            wakeups,
            closed: AtomicBool::new(false),
        }
    }

    /// Maps a message priority to its lane. Unknown values fall into the
    /// lowest lane.
    fn lane_of(level: u8) -> usize {
        priority::LEVELS
            .iter()
            .position(|candidate| *candidate == level)
            .unwrap_or(priority::LEVELS.len() - 1)
    }

    /// Enqueues a message behind earlier messages of the same priority.
    pub fn post(&self, message: Message) -> Result<(), MailboxError> {
        if self.is_closed() {
            return Err(MailboxError::Closed);
        }
        self.lanes[Self::lane_of(message.priority())].push(message);
        if self.is_closed() {
            // Lost the race against `close`; whatever is left is dropped.
            self.drain();
            return Err(MailboxError::Closed);
        }
        let _ = self.doorbell.send(());
        Ok(())
    }

    /// Pops the highest-priority message without waiting.
    pub fn try_next(&self) -> Option<Message> {
        self.lanes.iter().find_map(SegQueue::pop)
    }

    /// Waits for the next message.
    ///
    /// Returns `Ok(None)` when `deadline` passes first and
    /// `Err(MailboxError::Closed)` once the mailbox is closed.
    pub fn next_until(&self, deadline: Option<Instant>) -> Result<Option<Message>, MailboxError> {
        loop {
            if self.is_closed() {
                return Err(MailboxError::Closed);
            }
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            // Stale wakeups from messages already consumed.
            while self.wakeups.try_recv().is_ok() {}
            if let Some(message) = self.try_next() {
                return Ok(Some(message));
            }
            let woken = match deadline {
                Some(deadline) => self.wakeups.recv_deadline(deadline),
                None => self.wakeups.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match woken {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => return Ok(self.try_next()),
                // Both ends live in `self`.
                Err(RecvTimeoutError::Disconnected) => return Err(MailboxError::Closed),
            }
        }
    }

    /// Rejects further posts and drops every queued message.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.drain();
        let _ = self.doorbell.send(());
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Snapshot of the number of queued messages.
    pub fn len(&self) -> usize {
        self.lanes.iter().map(SegQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.iter().all(SegQueue::is_empty)
    }

    fn drain(&self) -> usize {
        let mut dropped = 0;
        for lane in &self.lanes {
            while lane.pop().is_some() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::trace!(dropped, "dropped messages from closed mailbox");
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::message::{Command, MessageKind, PublicQuery};
    use crate::thread::reply::{reply_channel, ReplyError};
    use jobqueue_api::{Job, Params};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn add(id: &str) -> Message {
        Message::AddJob {
            job: Job::from_fn(Params::new(1).with_id(id), || Ok(())),
            on_added: None,
        }
    }

    fn added_id(message: Message) -> String {
        match message {
            Message::AddJob { job, .. } => job.id().to_string(),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_fifo_within_priority() {
        let mailbox = PriorityMailbox::new();
        for id in ["a", "b", "c"] {
            mailbox.post(add(id)).unwrap();
        }
        let order: Vec<_> = (0..3)
            .map(|_| added_id(mailbox.try_next().unwrap()))
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn test_higher_priority_first() {
        let mailbox = PriorityMailbox::new();
        mailbox.post(add("a")).unwrap();
        mailbox.post(Message::WorkerIdle { worker: 1 }).unwrap();
        mailbox.post(Message::Command(Command::Stop)).unwrap();
        assert_eq!(mailbox.len(), 3);

        assert!(matches!(
            mailbox.try_next(),
            Some(Message::Command(Command::Stop))
        ));
        assert!(matches!(
            mailbox.try_next(),
            Some(Message::WorkerIdle { worker: 1 })
        ));
        assert_eq!(added_id(mailbox.try_next().unwrap()), "a");
    }

    #[test]
    fn test_total_order_across_kinds() {
        let mailbox = PriorityMailbox::new();
        let (reply, _pending) = reply_channel::<usize>();
        mailbox.post(add("job")).unwrap();
        mailbox.post(Message::WorkerKeepAliveExpired { worker: 2 }).unwrap();
        mailbox
            .post(Message::PublicQuery(PublicQuery::Count(reply)))
            .unwrap();
        mailbox
            .post(Message::Cancel {
                constraint: jobqueue_api::TagConstraint::Any,
                tags: vec!["t".to_string()],
                callback: Box::new(|_| {}),
            })
            .unwrap();
        mailbox.post(Message::Command(Command::Quit)).unwrap();

        let kinds: Vec<_> = std::iter::from_fn(|| mailbox.try_next())
            .map(|message| message.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Command,
                MessageKind::Cancel,
                MessageKind::PublicQuery,
                MessageKind::WorkerKeepAliveExpired,
                MessageKind::AddJob,
            ]
        );
    }

    #[test]
    fn test_next_until_times_out() {
        let mailbox = PriorityMailbox::new();
        let deadline = Instant::now() + Duration::from_millis(20);
        assert!(matches!(mailbox.next_until(Some(deadline)), Ok(None)));
        assert!(Instant::now() >= deadline);
    }

    #[test]
    fn test_next_until_wakes_on_post() {
        let mailbox = Arc::new(PriorityMailbox::new());
        let producer = Arc::clone(&mailbox);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.post(Message::WorkerIdle { worker: 7 }).unwrap();
        });
        let message = mailbox.next_until(None).unwrap();
        assert!(matches!(message, Some(Message::WorkerIdle { worker: 7 })));
        handle.join().unwrap();
    }

    #[test]
    fn test_close_rejects_posts_and_releases_waiters() {
        let mailbox = PriorityMailbox::new();
        let (reply, pending) = reply_channel::<usize>();
        mailbox
            .post(Message::PublicQuery(PublicQuery::Count(reply)))
            .unwrap();

        mailbox.close();
        assert!(mailbox.is_closed());
        assert!(mailbox.is_empty());
        assert_eq!(pending.wait(None), Err(ReplyError::Dropped));
        assert_eq!(
            mailbox.post(Message::WorkerIdle { worker: 1 }),
            Err(MailboxError::Closed)
        );
        assert!(matches!(
            mailbox.next_until(None),
            Err(MailboxError::Closed)
        ));
    }
}
