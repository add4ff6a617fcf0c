// Job Queue Engine
//
// A prioritized job-execution engine driven by a single coordinator thread.
// Callers enqueue jobs from any thread; a bounded, self-sizing pool of worker
// threads runs them, while cancellation, status queries and completion
// callbacks go through the coordinator's priority mailbox.
//
// The vocabulary types (jobs, params, tag constraints, statuses, observer
// trait) live in `jobqueue-api` and are re-exported here.

pub mod logging;
pub mod manager;
pub mod thread;

// Re-export commonly used types
pub use jobqueue_api::{
    priority, CancelResult, Job, JobBody, JobId, JobInfo, JobManagerCallback, JobStatus, Params,
    TagConstraint,
};
pub use manager::JobManager;
pub use thread::{
    Clock, ConfigError, Configuration, InMemoryPersister, JobManagerError, JobPersister,
    ListenerId, ManualClock, NoConsumersListener, SystemClock,
};
