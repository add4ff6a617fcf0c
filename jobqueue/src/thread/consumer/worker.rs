//! # Worker Thread
//!
//! A worker executes job bodies handed to it by the coordinator, one at a
//! time, on its own OS thread.
//!
//! ## Core Algorithm
//! 1. Report `WorkerIdle` to the coordinator
//! 2. Wait for a command for at most the keep-alive period
//! 3. `Run`: execute the body under panic isolation, then report
//!    `RunJobResult` (which also marks the worker idle again)
//! 4. Keep-alive elapsed: report `WorkerKeepAliveExpired` and keep waiting;
//!    the coordinator answers with `Exit` or `KeepWaiting`
//! 5. Exit on `Exit`, on a closed mailbox, or when the coordinator dropped
//!    the command channel
//!
//! A worker never decides on its own to retire, so the coordinator's view
//! of the worker count is always exact.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use flume::{Receiver, RecvTimeoutError};
use tracing::{debug, error, trace};

use crate::thread::error::{panic_message, JobManagerError, MailboxError};
use crate::thread::mailbox::PriorityMailbox;
use crate::thread::message::{JobOutcome, Message, RunnableJob, WorkerId};

/// Commands sent from the coordinator to one worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    Run(RunnableJob),
    /// Answer to an expired keep-alive: stay in the pool.
    KeepWaiting,
    Exit,
}

pub(crate) struct Worker {
    id: WorkerId,
    mailbox: Arc<PriorityMailbox>,
    commands: Receiver<WorkerCommand>,
    keep_alive: Duration,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        mailbox: Arc<PriorityMailbox>,
        commands: Receiver<WorkerCommand>,
        keep_alive: Duration,
    ) -> Self {
        Self {
            id,
            mailbox,
            commands,
            keep_alive,
        }
    }

    /// Starts the worker on a named OS thread.
    pub fn spawn(self, name: String) -> Result<JoinHandle<()>, JobManagerError> {
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|e| JobManagerError::Spawn(format!("{}: {}", name, e)))
    }

    fn run(self) {
        debug!(worker_id = self.id, "worker started");
        if self.report(Message::WorkerIdle { worker: self.id }).is_ok() {
            self.serve();
        }
        debug!(worker_id = self.id, "worker exited");
    }

    fn serve(&self) {
        loop {
            match self.commands.recv_timeout(self.keep_alive) {
                Ok(WorkerCommand::Run(job)) => {
                    let job_id = job.info.id.clone();
                    let outcome = execute(&job);
                    drop(job);
                    let report = Message::RunJobResult {
                        worker: self.id,
                        job_id,
                        outcome,
                    };
                    if self.report(report).is_err() {
                        return;
                    }
                }
                Ok(WorkerCommand::KeepWaiting) => {
                    trace!(worker_id = self.id, "keep-alive renewed");
                }
                Ok(WorkerCommand::Exit) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {
                    let expired = Message::WorkerKeepAliveExpired { worker: self.id };
                    if self.report(expired).is_err() {
                        return;
                    }
                }
            }
        }
    }

    fn report(&self, message: Message) -> Result<(), MailboxError> {
        self.mailbox.post(message).inspect_err(|_| {
            debug!(worker_id = self.id, "coordinator mailbox closed");
        })
    }
}

/// Runs a job body, converting panics into failures.
pub(crate) fn execute(job: &RunnableJob) -> JobOutcome {
    let span = crate::job_span!(job.info.id, priority = job.info.priority);
    let _guard = span.enter();
    trace!("running job body");
    match panic::catch_unwind(AssertUnwindSafe(|| job.body.run())) {
        Ok(Ok(())) => JobOutcome::Succeeded,
        Ok(Err(err)) => JobOutcome::Failed(err),
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(reason = %reason, "job body panicked");
            JobOutcome::Failed(anyhow!("job {} panicked: {}", job.info.id, reason))
        }
    }
}
