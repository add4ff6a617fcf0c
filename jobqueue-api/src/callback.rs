//! # Lifecycle Observers
//!
//! Observers registered on a job manager receive lifecycle events on the
//! callback dispatcher thread, never on the coordinator thread and never on
//! a worker thread.
//!
//! ## Ordering
//!
//! - For one event, observers are called in registration order.
//! - For one job, events arrive in program order:
//!   added -> run -> succeeded/failed -> done, or added -> cancelled -> done.
//!
//! ## Re-entrancy
//!
//! An observer may add or remove observers, including itself, from inside
//! any of these methods. Removal takes effect no later than the next event.

use crate::job::JobInfo;

/// Receives job lifecycle events. Every method has an empty default.
pub trait JobManagerCallback: Send + Sync {
    /// The coordinator accepted the job into its queue.
    fn on_job_added(&self, _job: &JobInfo) {}

    /// The job was handed to a worker and is about to run.
    fn on_job_run(&self, _job: &JobInfo) {}

    /// The job body returned `Ok`.
    fn on_job_succeeded(&self, _job: &JobInfo) {}

    /// The job body returned an error or panicked.
    fn on_job_failed(&self, _job: &JobInfo, _error: &anyhow::Error) {}

    /// The job was removed by a cancel request before it ran.
    fn on_job_cancelled(&self, _job: &JobInfo) {}

    /// The job reached a terminal state and left the engine.
    fn on_done(&self, _job: &JobInfo) {}
}
