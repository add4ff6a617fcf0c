//! # Coordinator Messages
//!
//! Every interaction with the coordinator thread is a [`Message`] posted to
//! its mailbox. Messages are moved into the mailbox and consumed by value,
//! so a message can never be observed again after the coordinator handled
//! it; no pooling is needed to uphold that.
//!
//! Replies travel back through a [`ReplySender`] (synchronous bridge) or a
//! boxed callback delivered by the callback dispatcher.

use std::fmt;
use std::sync::Arc;

use jobqueue_api::{priority, CancelResult, Job, JobBody, JobInfo, JobStatus, TagConstraint};

use crate::thread::error::JobManagerError;
use crate::thread::reply::ReplySender;

/// Identifier of a worker thread, unique within one manager.
pub type WorkerId = usize;

/// One-shot notification fired after a job was accepted (or rejected).
pub type AddCallback = Box<dyn FnOnce(Result<(), JobManagerError>) + Send>;

/// One-shot receiver of a cancel request's outcome.
pub type CancelCallback = Box<dyn FnOnce(CancelResult) + Send>;

/// Closure executed on the coordinator thread.
pub type CoordinatorTask = Box<dyn FnOnce() + Send>;

/// Engine lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Quit,
}

/// Requests answered synchronously against the coordinator's state.
pub enum PublicQuery {
    /// Number of pending jobs.
    Count(ReplySender<usize>),
    /// Number of pending jobs that could run right now.
    CountReady(ReplySender<usize>),
    JobStatus {
        id: String,
        reply: ReplySender<JobStatus>,
    },
    /// Number of alive workers, idle ones included.
    ActiveConsumerCount(ReplySender<usize>),
    /// Drops every pending job without running it.
    Clear(ReplySender<()>),
    /// Runs a closure on the coordinator thread; replies with the panic
    /// message if the closure panicked.
    InternalRunnable {
        task: CoordinatorTask,
        reply: ReplySender<Result<(), String>>,
    },
}

impl PublicQuery {
    pub fn name(&self) -> &'static str {
        match self {
            PublicQuery::Count(_) => "count",
            PublicQuery::CountReady(_) => "count_ready",
            PublicQuery::JobStatus { .. } => "job_status",
            PublicQuery::ActiveConsumerCount(_) => "active_consumer_count",
            PublicQuery::Clear(_) => "clear",
            PublicQuery::InternalRunnable { .. } => "internal_runnable",
        }
    }
}

/// How a job body finished on its worker.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded,
    Failed(anyhow::Error),
}

/// A job handed from the coordinator to a worker.
#[derive(Clone)]
pub struct RunnableJob {
    pub info: JobInfo,
    pub body: Arc<dyn JobBody>,
}

impl fmt::Debug for RunnableJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnableJob")
            .field("id", &self.info.id)
            .finish()
    }
}

/// Messages consumed by the coordinator thread.
pub enum Message {
    AddJob {
        job: Job,
        on_added: Option<AddCallback>,
    },
    Cancel {
        constraint: TagConstraint,
        tags: Vec<String>,
        callback: CancelCallback,
    },
    Command(Command),
    PublicQuery(PublicQuery),
    /// A worker finished a job and is idle again.
    RunJobResult {
        worker: WorkerId,
        job_id: String,
        outcome: JobOutcome,
    },
    /// A freshly started worker is ready for work.
    WorkerIdle { worker: WorkerId },
    /// An idle worker's keep-alive elapsed; it waits to be told whether to
    /// exit.
    WorkerKeepAliveExpired { worker: WorkerId },
}

/// Discriminant of a [`Message`], used for priorities and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    AddJob,
    Cancel,
    Command,
    PublicQuery,
    RunJobResult,
    WorkerIdle,
    WorkerKeepAliveExpired,
}

impl MessageKind {
    /// Mailbox priority. Control traffic preempts queries, queries preempt
    /// worker reports, and job submissions come last.
    pub fn priority(self) -> u8 {
        match self {
            MessageKind::Command => priority::CRITICAL,
            MessageKind::Cancel => priority::HIGH,
            MessageKind::PublicQuery => priority::NORMAL,
            MessageKind::RunJobResult
            | MessageKind::WorkerIdle
            | MessageKind::WorkerKeepAliveExpired => priority::LOW,
            MessageKind::AddJob => priority::BACKGROUND,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::AddJob => "add_job",
            MessageKind::Cancel => "cancel",
            MessageKind::Command => "command",
            MessageKind::PublicQuery => "public_query",
            MessageKind::RunJobResult => "run_job_result",
            MessageKind::WorkerIdle => "worker_idle",
            MessageKind::WorkerKeepAliveExpired => "worker_keep_alive_expired",
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::AddJob { .. } => MessageKind::AddJob,
            Message::Cancel { .. } => MessageKind::Cancel,
            Message::Command(_) => MessageKind::Command,
            Message::PublicQuery(_) => MessageKind::PublicQuery,
            Message::RunJobResult { .. } => MessageKind::RunJobResult,
            Message::WorkerIdle { .. } => MessageKind::WorkerIdle,
            Message::WorkerKeepAliveExpired { .. } => MessageKind::WorkerKeepAliveExpired,
        }
    }

    pub fn priority(&self) -> u8 {
        self.kind().priority()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::AddJob { job, on_added } => f
                .debug_struct("AddJob")
                .field("job", job)
                .field("on_added", &on_added.is_some())
                .finish(),
            Message::Cancel { constraint, tags, .. } => f
                .debug_struct("Cancel")
                .field("constraint", constraint)
                .field("tags", tags)
                .finish(),
            Message::Command(command) => f.debug_tuple("Command").field(command).finish(),
            Message::PublicQuery(query) => {
                f.debug_tuple("PublicQuery").field(&query.name()).finish()
            }
            Message::RunJobResult {
                worker,
                job_id,
                outcome,
            } => f
                .debug_struct("RunJobResult")
                .field("worker", worker)
                .field("job_id", job_id)
                .field("outcome", outcome)
                .finish(),
            Message::WorkerIdle { worker } => {
                f.debug_struct("WorkerIdle").field("worker", worker).finish()
            }
            Message::WorkerKeepAliveExpired { worker } => f
                .debug_struct("WorkerKeepAliveExpired")
                .field("worker", worker)
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobqueue_api::Params;

    #[test]
    fn test_control_preempts_queries_and_adds() {
        assert!(MessageKind::Command.priority() > MessageKind::Cancel.priority());
        assert!(MessageKind::Cancel.priority() > MessageKind::PublicQuery.priority());
        assert!(MessageKind::PublicQuery.priority() > MessageKind::WorkerIdle.priority());
        assert!(MessageKind::RunJobResult.priority() > MessageKind::AddJob.priority());
    }

    #[test]
    fn test_message_kind_and_debug() {
        let message = Message::AddJob {
            job: Job::from_fn(Params::new(1).with_id("a"), || Ok(())),
            on_added: None,
        };
        assert_eq!(message.kind(), MessageKind::AddJob);
        assert_eq!(message.priority(), priority::BACKGROUND);
        assert!(format!("{:?}", message).contains("\"a\""));

        let quit = Message::Command(Command::Quit);
        assert_eq!(quit.priority(), priority::CRITICAL);
    }
}
