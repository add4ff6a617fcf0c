//! # Job Definitions
//!
//! A job is the unit of work accepted by the engine. It is split into two
//! halves:
//!
//! - [`JobInfo`]: the plain, cloneable description (id, tags, priority,
//!   group, delay) that the coordinator schedules on and observers receive
//! - [`JobBody`]: the opaque executable part, shared behind an `Arc` so it
//!   can be handed to exactly one worker while the description stays with
//!   the coordinator
//!
//! Retry and backoff policies live inside the body itself. The engine only
//! learns whether a run finished successfully or failed for good.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a job, unique within one engine's lifetime.
pub type JobId = String;

/// Executable part of a job.
///
/// `run` is invoked on a worker thread, never on the coordinator thread.
/// Returning `Err` (or panicking) marks the job as failed with no further
/// retries; any retry policy must be applied inside `run`.
pub trait JobBody: Send + Sync + 'static {
    /// Executes the job.
    fn run(&self) -> anyhow::Result<()>;

    /// Called once if the job is removed by a cancel request before it ran.
    fn on_cancel(&self) {}
}

impl<F> JobBody for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn run(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Parameters applied when building a [`Job`].
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use jobqueue_api::Params;
///
/// let params = Params::new(10)
///     .with_id("upload-7")
///     .add_tags(["upload"])
///     .group_by("uploads")
///     .delay(Duration::from_millis(250));
///
/// assert_eq!(params.priority, 10);
/// assert_eq!(params.group_id.as_deref(), Some("uploads"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Higher priority jobs run first
    pub priority: i32,
    /// Explicit id; a random UUID is generated when absent
    pub id: Option<JobId>,
    /// Tags used by group operations such as cancellation
    pub tags: BTreeSet<String>,
    /// Jobs sharing a group id never run concurrently
    pub group_id: Option<String>,
    /// Minimum time between acceptance and the first run
    pub delay: Option<Duration>,
    /// Whether the persistence collaborator should record the job
    pub persistent: bool,
}

impl Params {
    pub fn new(priority: i32) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn add_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn group_by(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn persist(mut self) -> Self {
        self.persistent = true;
        self
    }
}

/// Schedulable description of a job.
///
/// This is what the coordinator orders, what status queries inspect and
/// what observers receive. It never carries the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: JobId,
    pub tags: BTreeSet<String>,
    pub priority: i32,
    pub group_id: Option<String>,
    pub delay: Option<Duration>,
    pub persistent: bool,
}

impl JobInfo {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

impl From<Params> for JobInfo {
    fn from(params: Params) -> Self {
        Self {
            id: params.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            tags: params.tags,
            priority: params.priority,
            group_id: params.group_id,
            delay: params.delay,
            persistent: params.persistent,
        }
    }
}

/// A job ready to be handed to the engine.
#[derive(Clone)]
pub struct Job {
    info: JobInfo,
    body: Arc<dyn JobBody>,
}

impl Job {
    /// Builds a job from its parameters and body.
    pub fn new(params: Params, body: impl JobBody) -> Self {
        Self::from_arc(params, Arc::new(body))
    }

    /// Builds a job whose body is a closure.
    pub fn from_fn<F>(params: Params, body: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::from_arc(params, Arc::new(body))
    }

    /// Builds a job around an already shared body.
    pub fn from_arc(params: Params, body: Arc<dyn JobBody>) -> Self {
        Self {
            info: JobInfo::from(params),
            body,
        }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.info.tags
    }

    pub fn priority(&self) -> i32 {
        self.info.priority
    }

    pub fn group_id(&self) -> Option<&str> {
        self.info.group_id.as_deref()
    }

    pub fn delay(&self) -> Option<Duration> {
        self.info.delay
    }

    pub fn is_persistent(&self) -> bool {
        self.info.persistent
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    pub fn body(&self) -> &Arc<dyn JobBody> {
        &self.body
    }

    /// Splits the job into its description and its body.
    pub fn into_parts(self) -> (JobInfo, Arc<dyn JobBody>) {
        (self.info, self.body)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.info.id)
            .field("priority", &self.info.priority)
            .field("tags", &self.info.tags)
            .field("group_id", &self.info.group_id)
            .field("body", &"<job-body>")
            .finish()
    }
}
