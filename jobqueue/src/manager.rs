//! # Job Manager
//!
//! The public entry point of the engine. A `JobManager` owns three kinds of
//! threads:
//!
//! - the coordinator, which owns every piece of queue state and processes
//!   one mailbox message at a time
//! - the consumers (workers), spawned and retired by the coordinator
//! - the callback dispatcher, which delivers lifecycle events to observers
//!
//! Callers never touch queue state. Asynchronous operations post a message
//! and return; synchronous ones post a message carrying a one-shot reply
//! slot and block on it.
//!
//! ## Thread Rules
//! - Synchronous calls fail with [`JobManagerError::Usage`] on the thread
//!   the configuration marks as must-not-block, and on the coordinator
//!   thread itself
//! - Calls that wait for the dispatcher (`add_job_sync`,
//!   `cancel_jobs_sync`, the consumer waits, `destroy`) also fail on the
//!   dispatcher thread, i.e. from inside an observer
//! - After `destroy` every call fails with [`JobManagerError::Shutdown`]
//!
//! ## Example
//!
//! ```rust
//! use jobqueue::{Configuration, Job, JobManager, Params};
//!
//! let manager = JobManager::new(Configuration {
//!     auto_start: true,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! manager
//!     .add_job_sync(Job::from_fn(Params::new(1).add_tags(["demo"]), || Ok(())))
//!     .unwrap();
//! manager.wait_until_consumers_are_finished().unwrap();
//! manager.destroy().unwrap();
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};

use jobqueue_api::{CancelResult, Job, JobManagerCallback, JobStatus, TagConstraint};
use tracing::{debug, error, info};

use crate::thread::callback::CallbackManager;
use crate::thread::config::Configuration;
use crate::thread::consumer::{ConsumerStatus, ListenerId, NoConsumersListener};
use crate::thread::coordinator::Coordinator;
use crate::thread::error::JobManagerError;
use crate::thread::mailbox::PriorityMailbox;
use crate::thread::message::{Command, Message, PublicQuery};
use crate::thread::reply::{reply_channel, ReplyError, ReplySender};

pub struct JobManager {
    config: Arc<Configuration>,
    mailbox: Arc<PriorityMailbox>,
    callbacks: Arc<CallbackManager>,
    consumers: Arc<ConsumerStatus>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    coordinator_thread: ThreadId,
    destroyed: AtomicBool,
}

impl fmt::Debug for JobManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobManager")
            .field("id", &self.config.id)
            .field("mailbox", &self.mailbox)
            .field("consumers", &self.consumers.worker_count())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl JobManager {
    /// Validates the configuration and starts the coordinator and callback
    /// dispatcher threads. With `auto_start` the manager starts running
    /// immediately; otherwise call [`start`](Self::start).
    pub fn new(config: Configuration) -> Result<Self, JobManagerError> {
        config.validate()?;
        let config = Arc::new(config);
        let mailbox = Arc::new(PriorityMailbox::new());
        let consumers = Arc::new(ConsumerStatus::new());
        let callbacks = CallbackManager::start(config.thread_name("callbacks"))?;

        let coordinator = Coordinator::new(
            Arc::clone(&config),
            Arc::clone(&mailbox),
            Arc::clone(&callbacks),
            Arc::clone(&consumers),
        );
        let handle = match coordinator.spawn() {
            Ok(handle) => handle,
            Err(err) => {
                callbacks.destroy();
                return Err(err);
            }
        };
        let coordinator_thread = handle.thread().id();
        info!(manager = %config.id, auto_start = config.auto_start, "job manager created");

        Ok(Self {
            config,
            mailbox,
            callbacks,
            consumers,
            coordinator: Mutex::new(Some(handle)),
            coordinator_thread,
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Lets consumers pick up jobs.
    pub fn start(&self) -> Result<(), JobManagerError> {
        self.post(Message::Command(Command::Start))
    }

    /// Stops handing out jobs. Running jobs finish; idle consumers exit.
    pub fn stop(&self) -> Result<(), JobManagerError> {
        self.post(Message::Command(Command::Stop))
    }

    /// Queues a job without waiting for the coordinator.
    pub fn add_job_async(&self, job: Job) -> Result<(), JobManagerError> {
        self.post(Message::AddJob {
            job,
            on_added: None,
        })
    }

    /// Queues a job; `on_added` runs on the callback dispatcher thread once
    /// the coordinator accepted (or rejected) it.
    pub fn add_job_async_with<F>(&self, job: Job, on_added: F) -> Result<(), JobManagerError>
    where
        F: FnOnce(Result<(), JobManagerError>) + Send + 'static,
    {
        self.post(Message::AddJob {
            job,
            on_added: Some(Box::new(on_added)),
        })
    }

    /// Queues a job and blocks until it is accepted and observers have seen
    /// `on_job_added`.
    pub fn add_job_sync(&self, job: Job) -> Result<(), JobManagerError> {
        self.ensure_may_wait_for_callbacks("add_job_sync")?;
        let (reply, pending) = reply_channel::<Result<(), JobManagerError>>();
        self.post(Message::AddJob {
            job,
            on_added: Some(Box::new(move |result: Result<(), JobManagerError>| {
                reply.send(result);
            })),
        })?;
        pending
            .wait(self.config.query_timeout)
            .map_err(|err| self.bridge_error(err))?
    }

    /// Cancels every job matching `tags` under `constraint`.
    ///
    /// `callback` runs on the callback dispatcher thread. When running jobs
    /// match, it runs only after they finished; they are reported as failed
    /// to cancel.
    pub fn cancel_jobs_async<I, S, F>(
        &self,
        constraint: TagConstraint,
        tags: I,
        callback: F,
    ) -> Result<(), JobManagerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnOnce(CancelResult) + Send + 'static,
    {
        let tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        if tags.is_empty() {
            return Err(JobManagerError::usage("cancel requires at least one tag"));
        }
        self.post(Message::Cancel {
            constraint,
            tags,
            callback: Box::new(callback),
        })
    }

    /// Blocking form of [`cancel_jobs_async`](Self::cancel_jobs_async).
    pub fn cancel_jobs_sync<I, S>(
        &self,
        constraint: TagConstraint,
        tags: I,
    ) -> Result<CancelResult, JobManagerError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ensure_may_wait_for_callbacks("cancel_jobs_sync")?;
        let (reply, pending) = reply_channel();
        self.cancel_jobs_async(constraint, tags, move |result| {
            reply.send(result);
        })?;
        pending
            .wait(self.config.query_timeout)
            .map_err(|err| self.bridge_error(err))
    }

    /// Number of pending jobs (not counting running ones).
    pub fn count(&self) -> Result<usize, JobManagerError> {
        self.query("count", PublicQuery::Count)
    }

    /// Number of pending jobs that could run right now.
    pub fn count_ready_jobs(&self) -> Result<usize, JobManagerError> {
        self.query("count_ready_jobs", PublicQuery::CountReady)
    }

    /// Number of alive consumers, idle ones included.
    pub fn active_consumer_count(&self) -> Result<usize, JobManagerError> {
        self.query("active_consumer_count", PublicQuery::ActiveConsumerCount)
    }

    pub fn job_status(&self, id: &str) -> Result<JobStatus, JobManagerError> {
        let id = id.to_string();
        self.query("job_status", |reply| PublicQuery::JobStatus { id, reply })
    }

    /// Drops every pending job without running it and forgets cancelled
    /// ids, which answer `Unknown` afterwards. Running jobs are not
    /// affected.
    pub fn clear(&self) -> Result<(), JobManagerError> {
        self.query("clear", PublicQuery::Clear)
    }

    pub fn add_callback(&self, callback: Arc<dyn JobManagerCallback>) -> Result<(), JobManagerError> {
        self.ensure_alive()?;
        self.callbacks.add_callback(callback)
    }

    /// Returns false if `callback` was not registered.
    pub fn remove_callback(&self, callback: &Arc<dyn JobManagerCallback>) -> bool {
        self.callbacks.remove_callback(callback)
    }

    /// Registers a listener fired on the coordinator thread each time the
    /// consumer count drops to zero.
    pub fn add_no_consumers_listener(&self, listener: NoConsumersListener) -> ListenerId {
        self.consumers.add_no_consumers_listener(listener)
    }

    pub fn remove_no_consumers_listener(&self, id: ListenerId) -> bool {
        self.consumers.remove_no_consumers_listener(id)
    }

    /// Stops the manager and blocks until every consumer exited and every
    /// lifecycle event emitted so far reached the observers.
    pub fn stop_and_wait_until_consumers_are_finished(&self) -> Result<(), JobManagerError> {
        self.ensure_may_wait_for_callbacks("stop_and_wait_until_consumers_are_finished")?;
        self.wait_for_consumers(true)
    }

    /// Blocks until the consumer count is zero and every lifecycle event
    /// emitted so far reached the observers.
    pub fn wait_until_consumers_are_finished(&self) -> Result<(), JobManagerError> {
        self.ensure_may_wait_for_callbacks("wait_until_consumers_are_finished")?;
        self.wait_for_consumers(false)
    }

    /// Stops the manager, waits for running jobs, and shuts every engine
    /// thread down. Pending jobs are dropped without running. Every later
    /// call fails with [`JobManagerError::Shutdown`].
    pub fn destroy(&self) -> Result<(), JobManagerError> {
        self.ensure_may_wait_for_callbacks("destroy")?;
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(JobManagerError::Shutdown);
        }
        let drained = self.wait_for_consumers(true);
        let _ = self.mailbox.post(Message::Command(Command::Quit));
        self.join_coordinator();
        self.callbacks.destroy();
        info!(manager = %self.config.id, "job manager destroyed");
        drained
    }

    /// Runs `task` on the coordinator thread and waits for it. Meant for
    /// tests that need a synchronization point with the coordinator.
    #[doc(hidden)]
    pub fn internal_run_in_coordinator<F>(&self, task: F) -> Result<(), JobManagerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Box::new(task);
        self.query("internal_run_in_coordinator", |reply| {
            PublicQuery::InternalRunnable { task, reply }
        })?
        .map_err(JobManagerError::CoordinationFault)
    }

    fn post(&self, message: Message) -> Result<(), JobManagerError> {
        self.ensure_alive()?;
        self.mailbox.post(message).map_err(Into::into)
    }

    fn query<T, B>(&self, operation: &str, build: B) -> Result<T, JobManagerError>
    where
        B: FnOnce(ReplySender<T>) -> PublicQuery,
    {
        self.ensure_may_block(operation)?;
        let (reply, pending) = reply_channel();
        self.post(Message::PublicQuery(build(reply)))?;
        pending
            .wait(self.config.query_timeout)
            .map_err(|err| self.bridge_error(err))
    }

    fn wait_for_consumers(&self, stop: bool) -> Result<(), JobManagerError> {
        let (signal, finished) = flume::bounded::<()>(1);
        let listener = self
            .consumers
            .add_no_consumers_listener(Arc::new(move || {
                let _ = signal.try_send(());
            }));

        let waited = self.wait_for_zero_consumers(stop, &finished);
        self.consumers.remove_no_consumers_listener(listener);
        waited?;

        debug!(manager = %self.config.id, "consumers finished, flushing callbacks");
        self.callbacks
            .flush()
            .wait(self.config.query_timeout)
            .map_err(|err| self.bridge_error(err))
    }

    fn wait_for_zero_consumers(
        &self,
        stop: bool,
        finished: &flume::Receiver<()>,
    ) -> Result<(), JobManagerError> {
        if stop {
            self.mailbox.post(Message::Command(Command::Stop))?;
        }
        // The shared count can lag an add that was already acknowledged.
        if self.coordinator_consumer_count()? == 0 {
            return Ok(());
        }
        let woke = match self.config.query_timeout {
            Some(limit) => finished
                .recv_timeout(limit)
                .map_err(|_| JobManagerError::Timeout(limit)),
            None => finished.recv().map_err(|_| JobManagerError::Shutdown),
        };
        // The count may reach zero right as the wait times out.
        if woke.is_err() && self.consumers.worker_count() == 0 {
            return Ok(());
        }
        woke
    }

    /// Worker count as seen by the coordinator once it handled every add
    /// that was already acknowledged. Posts directly so `destroy` can use
    /// it after the destroyed flag is set.
    fn coordinator_consumer_count(&self) -> Result<usize, JobManagerError> {
        let (reply, pending) = reply_channel();
        self.mailbox
            .post(Message::PublicQuery(PublicQuery::ActiveConsumerCount(reply)))?;
        pending
            .wait(self.config.query_timeout)
            .map_err(|err| self.bridge_error(err))
    }

    fn join_coordinator(&self) {
        let handle = self
            .coordinator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(manager = %self.config.id, "coordinator thread panicked");
            }
        }
    }

    fn ensure_alive(&self) -> Result<(), JobManagerError> {
        if self.is_destroyed() {
            return Err(JobManagerError::Shutdown);
        }
        Ok(())
    }

    fn ensure_may_block(&self, operation: &str) -> Result<(), JobManagerError> {
        self.ensure_alive()?;
        if let Some(forbidden) = &self.config.blocking_forbidden {
            if forbidden() {
                return Err(JobManagerError::usage(format!(
                    "{} blocks and cannot be called on this thread",
                    operation
                )));
            }
        }
        if std::thread::current().id() == self.coordinator_thread {
            return Err(JobManagerError::usage(format!(
                "{} cannot be called on the coordinator thread",
                operation
            )));
        }
        Ok(())
    }

    fn ensure_may_wait_for_callbacks(&self, operation: &str) -> Result<(), JobManagerError> {
        self.ensure_may_block(operation)?;
        if self.callbacks.is_dispatcher_thread() {
            return Err(JobManagerError::usage(format!(
                "{} cannot be called from a callback",
                operation
            )));
        }
        Ok(())
    }

    fn bridge_error(&self, err: ReplyError) -> JobManagerError {
        match err {
            ReplyError::Timeout(limit) => JobManagerError::Timeout(limit),
            ReplyError::Dropped if self.mailbox.is_closed() || self.is_destroyed() => {
                JobManagerError::Shutdown
            }
            ReplyError::Dropped => JobManagerError::CoordinationFault(
                "request was dropped before a reply was sent".to_string(),
            ),
        }
    }
}

impl Drop for JobManager {
    fn drop(&mut self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(manager = %self.config.id, "job manager dropped without destroy");
        let _ = self.mailbox.post(Message::Command(Command::Quit));
        self.callbacks.destroy();
    }
}
