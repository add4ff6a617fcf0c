//! # Coordinator Thread
//!
//! The single owner of all job-queue state. Every mutation (adds, cancels,
//! queries, worker reports, lifecycle commands) arrives as a message and is
//! handled to completion before the next message is read, so no lock guards
//! the queue, the running registry, or the worker bookkeeping.
//!
//! ## Lifecycle
//! `Stopped -> Running <-> Stopped -> Quit`. Jobs are accepted in every
//! state except `Quit`, but only handed to workers while `Running`.
//!
//! ## Fault Handling
//! Each message is handled under `catch_unwind`. A fault is logged, the
//! message (and any reply sender inside it) is dropped so the waiting caller
//! is released, and the loop continues with the next message.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use jobqueue_api::{CancelResult, Job, JobId, JobInfo, JobStatus, TagConstraint};
use tracing::{debug, error, trace, warn};

use crate::thread::callback::{CallbackEvent, CallbackManager};
use crate::thread::config::Configuration;
use crate::thread::consumer::{ConsumerManager, ConsumerSettings, ConsumerStatus};
use crate::thread::error::{panic_message, JobManagerError, MailboxError};
use crate::thread::job_queue::{JobQueue, PendingJob};
use crate::thread::mailbox::PriorityMailbox;
use crate::thread::message::{
    AddCallback, CancelCallback, Command, JobOutcome, Message, PublicQuery, RunnableJob, WorkerId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EngineState {
    Stopped,
    Running,
    Quit,
}

enum Flow {
    Continue,
    Quit,
}

struct RunningJob {
    info: JobInfo,
    worker: WorkerId,
    started: u64,
}

/// A cancel request still waiting for matched running jobs to finish.
struct PendingCancel {
    result: CancelResult,
    waiting_for: HashSet<JobId>,
    callback: CancelCallback,
}

pub(crate) struct Coordinator {
    config: Arc<Configuration>,
    mailbox: Arc<PriorityMailbox>,
    callbacks: Arc<CallbackManager>,
    consumers: ConsumerManager,
    state: EngineState,
    queue: JobQueue,
    running: HashMap<JobId, RunningJob>,
    running_groups: HashSet<String>,
    /// Ids answering `Cancelled` to status queries. An id leaves the set
    /// when it is added again or on `clear`.
    cancelled: HashSet<JobId>,
    pending_cancels: Vec<PendingCancel>,
    started_seq: u64,
}

impl Coordinator {
    pub fn new(
        config: Arc<Configuration>,
        mailbox: Arc<PriorityMailbox>,
        callbacks: Arc<CallbackManager>,
        consumer_status: Arc<ConsumerStatus>,
    ) -> Self {
        let consumers = ConsumerManager::new(
            ConsumerSettings::from(config.as_ref()),
            Arc::clone(&mailbox),
            consumer_status,
        );
        let state = if config.auto_start {
            EngineState::Running
        } else {
            EngineState::Stopped
        };
        Self {
            config,
            mailbox,
            callbacks,
            consumers,
            state,
            queue: JobQueue::new(),
            running: HashMap::new(),
            running_groups: HashSet::new(),
            cancelled: HashSet::new(),
            pending_cancels: Vec::new(),
            started_seq: 0,
        }
    }

    /// Moves the coordinator onto its own named thread.
    pub fn spawn(self) -> Result<JoinHandle<()>, JobManagerError> {
        let name = self.config.thread_name("coordinator");
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|e| JobManagerError::Spawn(format!("{}: {}", name, e)))
    }

    fn run(mut self) {
        crate::log_coordinator!(self.config.id, "coordinator_started", state = ?self.state);
        if self.state == EngineState::Running {
            self.dispatch_ready_jobs();
        }
        loop {
            let deadline = self.next_wakeup();
            let message = match self.mailbox.next_until(deadline) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    self.dispatch_ready_jobs();
                    continue;
                }
                Err(MailboxError::Closed) => break,
            };
            let kind = message.kind();
            trace!(message = kind.name(), "handling message");
            match panic::catch_unwind(AssertUnwindSafe(|| self.handle(message))) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(payload) => error!(
                    message = kind.name(),
                    reason = %panic_message(payload.as_ref()),
                    "coordinator fault while handling message"
                ),
            }
        }
        self.shutdown();
    }

    /// Real-time instant at which the earliest delayed job becomes ready.
    fn next_wakeup(&self) -> Option<Instant> {
        if self.state != EngineState::Running {
            return None;
        }
        let now = self.config.clock.now();
        let ready_at = self.queue.next_ready_at(now)?;
        Some(Instant::now() + (ready_at - now))
    }

    fn handle(&mut self, message: Message) -> Flow {
        match message {
            Message::AddJob { job, on_added } => self.on_add(job, on_added),
            Message::Cancel {
                constraint,
                tags,
                callback,
            } => self.on_cancel(constraint, &tags, callback),
            Message::Command(command) => return self.on_command(command),
            Message::PublicQuery(query) => self.on_query(query),
            Message::RunJobResult {
                worker,
                job_id,
                outcome,
            } => self.on_job_finished(worker, &job_id, outcome),
            Message::WorkerIdle { worker } => self.on_worker_idle(worker),
            Message::WorkerKeepAliveExpired { worker } => self.on_keep_alive_expired(worker),
        }
        Flow::Continue
    }

    fn on_add(&mut self, job: Job, on_added: Option<AddCallback>) {
        let (info, body) = job.into_parts();
        if self.queue.contains(&info.id) || self.running.contains_key(&info.id) {
            warn!(job_id = %info.id, "rejecting job with a live id");
            if let Some(ack) = on_added {
                self.callbacks.emit(CallbackEvent::Rejected {
                    ack,
                    error: JobManagerError::DuplicateJob(info.id),
                });
            }
            return;
        }
        let ready_at = match info.delay {
            None => None,
            Some(delay) => match self.config.clock.now().checked_add(delay) {
                Some(at) => Some(at),
                None => {
                    warn!(job_id = %info.id, ?delay, "rejecting job with an unrepresentable delay");
                    if let Some(ack) = on_added {
                        self.callbacks.emit(CallbackEvent::Rejected {
                            ack,
                            error: JobManagerError::usage(format!(
                                "delay of job {} is too long: {:?}",
                                info.id, delay
                            )),
                        });
                    }
                    return;
                }
            },
        };
        self.cancelled.remove(&info.id);
        if info.persistent {
            self.persist(&info);
        }
        crate::log_job!(info.id, "added", priority = info.priority);
        self.queue.insert(info.clone(), body, ready_at);
        self.callbacks.emit(CallbackEvent::Added {
            job: info,
            ack: on_added,
        });
        self.dispatch_ready_jobs();
    }

    fn on_cancel(&mut self, constraint: TagConstraint, tags: &[String], callback: CancelCallback) {
        let mut result = CancelResult::new();
        for id in self.queue.matching(constraint, tags) {
            let Some(job) = self.queue.remove(&id) else {
                continue;
            };
            result.add_cancelled(id.clone());
            self.forget_persisted(&job.info);
            self.cancelled.insert(id);
            self.callbacks.emit(CallbackEvent::Cancelled {
                job: job.info,
                body: job.body,
            });
        }

        let mut running: Vec<_> = self
            .running
            .iter()
            .filter(|(_, job)| constraint.matches(tags, &job.info.tags))
            .map(|(id, job)| (job.started, id.clone()))
            .collect();
        running.sort();
        let waiting_for: HashSet<JobId> = running.iter().map(|(_, id)| id.clone()).collect();
        for (_, id) in running {
            result.add_failed_to_cancel(id);
        }

        debug!(
            %constraint,
            cancelled = result.cancelled().len(),
            running = waiting_for.len(),
            "cancel processed"
        );
        if waiting_for.is_empty() {
            self.callbacks
                .emit(CallbackEvent::CancelResult { result, callback });
        } else {
            self.pending_cancels.push(PendingCancel {
                result,
                waiting_for,
                callback,
            });
        }
    }

    fn on_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Start => {
                if self.state != EngineState::Running {
                    crate::log_coordinator!(self.config.id, "started");
                }
                self.state = EngineState::Running;
                self.dispatch_ready_jobs();
            }
            Command::Stop => {
                if self.state == EngineState::Running {
                    crate::log_coordinator!(self.config.id, "stopped");
                }
                self.state = EngineState::Stopped;
                self.consumers.retire_idle();
            }
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn on_query(&mut self, query: PublicQuery) {
        match query {
            PublicQuery::Count(reply) => {
                reply.send(self.queue.len());
            }
            PublicQuery::CountReady(reply) => {
                let now = self.config.clock.now();
                reply.send(self.queue.count_ready(now, &self.running_groups));
            }
            PublicQuery::JobStatus { id, reply } => {
                reply.send(self.status_of(&id));
            }
            PublicQuery::ActiveConsumerCount(reply) => {
                reply.send(self.consumers.worker_count());
            }
            PublicQuery::Clear(reply) => {
                let dropped = self.queue.clear();
                for job in &dropped {
                    self.forget_persisted(&job.info);
                }
                self.cancelled.clear();
                debug!(dropped = dropped.len(), "pending jobs cleared");
                reply.send(());
            }
            PublicQuery::InternalRunnable { task, reply } => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                    .map_err(|payload| panic_message(payload.as_ref()));
                if let Err(reason) = &outcome {
                    error!(reason = %reason, "coordinator task panicked");
                }
                reply.send(outcome);
            }
        }
    }

    fn status_of(&self, id: &str) -> JobStatus {
        if self.running.contains_key(id) {
            JobStatus::Running
        } else if self.queue.contains(id) {
            JobStatus::Pending
        } else if self.cancelled.contains(id) {
            JobStatus::Cancelled
        } else {
            JobStatus::Unknown
        }
    }

    fn on_job_finished(&mut self, worker: WorkerId, job_id: &str, outcome: JobOutcome) {
        match self.running.remove(job_id) {
            Some(running) => {
                if running.worker != worker {
                    warn!(
                        job_id,
                        worker_id = worker,
                        expected = running.worker,
                        "result from unexpected consumer"
                    );
                }
                if let Some(group) = &running.info.group_id {
                    self.running_groups.remove(group);
                }
                self.forget_persisted(&running.info);
                match outcome {
                    JobOutcome::Succeeded => {
                        debug!(job_id, worker_id = worker, "job succeeded");
                        self.callbacks.emit(CallbackEvent::Succeeded(running.info));
                    }
                    JobOutcome::Failed(err) => {
                        warn!(job_id, worker_id = worker, error = %err, "job failed");
                        self.callbacks.emit(CallbackEvent::Failed {
                            job: running.info,
                            error: err,
                        });
                    }
                }
                self.resolve_pending_cancels(job_id);
            }
            None => warn!(job_id, worker_id = worker, "result for a job that is not running"),
        }
        self.on_worker_idle(worker);
    }

    fn resolve_pending_cancels(&mut self, finished: &str) {
        let mut index = 0;
        while index < self.pending_cancels.len() {
            let pending = &mut self.pending_cancels[index];
            pending.waiting_for.remove(finished);
            if pending.waiting_for.is_empty() {
                let done = self.pending_cancels.remove(index);
                self.callbacks.emit(CallbackEvent::CancelResult {
                    result: done.result,
                    callback: done.callback,
                });
            } else {
                index += 1;
            }
        }
    }

    fn on_worker_idle(&mut self, worker: WorkerId) {
        if !self.consumers.mark_idle(worker) {
            return;
        }
        if self.state == EngineState::Running {
            self.dispatch_ready_jobs();
        } else if self.consumers.is_idle(worker) {
            self.consumers.retire(worker);
        }
    }

    fn on_keep_alive_expired(&mut self, worker: WorkerId) {
        if !self.consumers.is_idle(worker) {
            // Already handed a job after posting the expiry.
            return;
        }
        if self.state == EngineState::Running {
            self.dispatch_ready_jobs();
            if !self.consumers.is_idle(worker) {
                return;
            }
        }
        if self.state != EngineState::Running || self.consumers.above_minimum() {
            self.consumers.retire(worker);
        } else {
            self.consumers.keep_waiting(worker);
        }
    }

    /// Hands ready jobs to idle workers, then resizes the pool.
    fn dispatch_ready_jobs(&mut self) {
        if self.state != EngineState::Running {
            return;
        }
        let now = self.config.clock.now();
        while self.consumers.has_idle() {
            let Some(job) = self.queue.take_next_ready(now, &self.running_groups) else {
                break;
            };
            if let Err(job) = self.start_job(job) {
                self.queue.restore(job);
                break;
            }
        }
        let ready = self.queue.count_ready(now, &self.running_groups);
        self.consumers.grow(ready, self.running.len());
    }

    fn start_job(&mut self, job: PendingJob) -> Result<(), PendingJob> {
        let runnable = RunnableJob {
            info: job.info.clone(),
            body: Arc::clone(&job.body),
        };
        let worker = match self.consumers.assign(runnable) {
            Ok(worker) => worker,
            Err(_) => return Err(job),
        };
        let info = job.info;
        if let Some(group) = &info.group_id {
            self.running_groups.insert(group.clone());
        }
        self.started_seq += 1;
        crate::log_job!(info.id, "handed_to_consumer", worker_id = worker);
        self.running.insert(
            info.id.clone(),
            RunningJob {
                info: info.clone(),
                worker,
                started: self.started_seq,
            },
        );
        self.callbacks.emit(CallbackEvent::Run(info));
        Ok(())
    }

    fn persist(&self, info: &JobInfo) {
        if let Some(persister) = &self.config.persister {
            if let Err(err) = persister.persist(info) {
                crate::log_error!(err, job_id = %info.id, "could not persist job");
            }
        }
    }

    fn forget_persisted(&self, info: &JobInfo) {
        if !info.persistent {
            return;
        }
        if let Some(persister) = &self.config.persister {
            if let Err(err) = persister.remove(&info.id) {
                crate::log_error!(err, job_id = %info.id, "could not remove persisted job");
            }
        }
    }

    fn shutdown(&mut self) {
        self.state = EngineState::Quit;
        self.mailbox.close();
        for pending in self.pending_cancels.drain(..) {
            self.callbacks.emit(CallbackEvent::CancelResult {
                result: pending.result,
                callback: pending.callback,
            });
        }
        let abandoned = self.queue.clear().len();
        self.consumers.shutdown();
        crate::log_coordinator!(
            self.config.id,
            "coordinator_stopped",
            abandoned,
            running = self.running.len()
        );
    }
}
