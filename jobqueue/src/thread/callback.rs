//! # Callback Dispatcher
//!
//! Delivers job lifecycle events to registered observers on a dedicated
//! thread, so observers never run on the coordinator thread or on a worker.
//!
//! ## Key Concepts
//! - The coordinator is the only producer of lifecycle events, so events
//!   for one job arrive in program order
//! - Each event is delivered to a snapshot of the observer list taken when
//!   the event is processed; observers may add or remove observers
//!   (including themselves) from inside a callback
//! - A panicking observer is logged and skipped; the others still see the
//!   event
//! - One-shot caller callbacks (add acknowledgements, cancel results) are
//!   invoked here too, after the observers saw the matching event

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::{self, JoinHandle, ThreadId};

use flume::{Receiver, Sender};
use jobqueue_api::{CancelResult, JobBody, JobInfo, JobManagerCallback};
use tracing::{debug, error, trace};

use crate::thread::error::{panic_message, JobManagerError};
use crate::thread::message::{AddCallback, CancelCallback};
use crate::thread::reply::{reply_channel, ReplyReceiver, ReplySender};

/// Events queued for the dispatcher thread.
pub(crate) enum CallbackEvent {
    Added {
        job: JobInfo,
        ack: Option<AddCallback>,
    },
    /// The add was refused; only the submitter hears about it.
    Rejected {
        ack: AddCallback,
        error: JobManagerError,
    },
    Run(JobInfo),
    Succeeded(JobInfo),
    Failed {
        job: JobInfo,
        error: anyhow::Error,
    },
    Cancelled {
        job: JobInfo,
        body: Arc<dyn JobBody>,
    },
    CancelResult {
        result: CancelResult,
        callback: CancelCallback,
    },
    /// Answered once every earlier event was delivered.
    Flush(ReplySender<()>),
    Terminate,
}

impl CallbackEvent {
    fn name(&self) -> &'static str {
        match self {
            CallbackEvent::Added { .. } => "added",
            CallbackEvent::Rejected { .. } => "rejected",
            CallbackEvent::Run(_) => "run",
            CallbackEvent::Succeeded(_) => "succeeded",
            CallbackEvent::Failed { .. } => "failed",
            CallbackEvent::Cancelled { .. } => "cancelled",
            CallbackEvent::CancelResult { .. } => "cancel_result",
            CallbackEvent::Flush(_) => "flush",
            CallbackEvent::Terminate => "terminate",
        }
    }
}

pub struct CallbackManager {
    observers: RwLock<Vec<Arc<dyn JobManagerCallback>>>,
    events: Sender<CallbackEvent>,
    destroyed: AtomicBool,
    thread_id: OnceLock<ThreadId>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for CallbackManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackManager")
            .field("observers", &self.observer_count())
            .field("queued", &self.events.len())
            .field("destroyed", &self.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

impl CallbackManager {
    /// Starts the dispatcher thread.
    pub fn start(thread_name: String) -> Result<Arc<Self>, JobManagerError> {
        let (events, inbox) = flume::unbounded();
        let manager = Arc::new(Self {
            observers: RwLock::new(Vec::new()),
            events,
            destroyed: AtomicBool::new(false),
            thread_id: OnceLock::new(),
            handle: Mutex::new(None),
        });

        let dispatcher = Arc::clone(&manager);
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || dispatcher.run(inbox))
            .map_err(|e| JobManagerError::Spawn(format!("{}: {}", thread_name, e)))?;
        let _ = manager.thread_id.set(handle.thread().id());
        *manager.lock_handle() = Some(handle);
        Ok(manager)
    }

    pub fn add_callback(&self, callback: Arc<dyn JobManagerCallback>) -> Result<(), JobManagerError> {
        if self.is_destroyed() {
            return Err(JobManagerError::Shutdown);
        }
        self.write_observers().push(callback);
        Ok(())
    }

    /// Removes the first registration of `callback`. Returns false if it was
    /// not registered.
    pub fn remove_callback(&self, callback: &Arc<dyn JobManagerCallback>) -> bool {
        let target = Arc::as_ptr(callback) as *const ();
        let mut observers = self.write_observers();
        match observers
            .iter()
            .position(|registered| Arc::as_ptr(registered) as *const () == target)
        {
            Some(index) => {
                observers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the current thread is the dispatcher thread.
    pub fn is_dispatcher_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Queues an event. Events emitted after `destroy` are dropped, which
    /// releases any caller waiting on a callback inside them.
    pub(crate) fn emit(&self, event: CallbackEvent) {
        if self.is_destroyed() {
            trace!(event = event.name(), "dispatcher destroyed, dropping event");
            return;
        }
        if let Err(flume::SendError(event)) = self.events.send(event) {
            debug!(event = event.name(), "dispatcher gone, dropping event");
        }
    }

    /// Returns a receiver that completes once every event queued before
    /// this call has been delivered.
    pub(crate) fn flush(&self) -> ReplyReceiver<()> {
        let (reply, pending) = reply_channel();
        self.emit(CallbackEvent::Flush(reply));
        pending
    }

    /// Stops the dispatcher after the events already queued, and forgets
    /// every observer. Joins the thread unless called from it.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write_observers().clear();
        let _ = self.events.send(CallbackEvent::Terminate);
        if self.is_dispatcher_thread() {
            return;
        }
        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("callback dispatcher thread panicked");
            }
        }
        debug!("callback dispatcher destroyed");
    }

    fn run(self: Arc<Self>, inbox: Receiver<CallbackEvent>) {
        debug!("callback dispatcher started");
        while let Ok(event) = inbox.recv() {
            if matches!(event, CallbackEvent::Terminate) {
                break;
            }
            self.deliver(event);
        }
        // Whatever is still queued only holds callers' callbacks; dropping
        // them releases the callers.
        let leftover = inbox.drain().count();
        debug!(leftover, "callback dispatcher stopped");
    }

    fn deliver(&self, event: CallbackEvent) {
        match event {
            CallbackEvent::Added { job, ack } => {
                self.notify("on_job_added", |observer| observer.on_job_added(&job));
                if let Some(ack) = ack {
                    guarded("add acknowledgement", || ack(Ok(())));
                }
            }
            CallbackEvent::Rejected { ack, error } => {
                guarded("add acknowledgement", || ack(Err(error)));
            }
            CallbackEvent::Run(job) => {
                self.notify("on_job_run", |observer| observer.on_job_run(&job));
            }
            CallbackEvent::Succeeded(job) => {
                self.notify("on_job_succeeded", |observer| observer.on_job_succeeded(&job));
                self.notify("on_done", |observer| observer.on_done(&job));
            }
            CallbackEvent::Failed { job, error } => {
                self.notify("on_job_failed", |observer| observer.on_job_failed(&job, &error));
                self.notify("on_done", |observer| observer.on_done(&job));
            }
            CallbackEvent::Cancelled { job, body } => {
                guarded("job cancel hook", || body.on_cancel());
                self.notify("on_job_cancelled", |observer| observer.on_job_cancelled(&job));
                self.notify("on_done", |observer| observer.on_done(&job));
            }
            CallbackEvent::CancelResult { result, callback } => {
                guarded("cancel callback", || callback(result));
            }
            CallbackEvent::Flush(reply) => {
                reply.send(());
            }
            CallbackEvent::Terminate => {}
        }
    }

    fn notify(&self, event: &'static str, f: impl Fn(&dyn JobManagerCallback)) {
        let snapshot: Vec<_> = self.observers.read().unwrap_or_else(|e| e.into_inner()).clone();
        for observer in snapshot {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                error!(
                    event,
                    reason = %panic_message(payload.as_ref()),
                    "observer panicked"
                );
            }
        }
    }

    fn write_observers(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<dyn JobManagerCallback>>> {
        self.observers.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn guarded(what: &'static str, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(callback = what, reason = %panic_message(payload.as_ref()), "callback panicked");
    }
}
