//! # Job Queue API
//!
//! Runtime-independent vocabulary shared by the job queue engine and the code
//! that feeds it work.
//!
//! ## Core Components
//!
//! - **Jobs**: an identity, a tag set, a priority and an opaque runnable body
//! - **Params**: builder-style knobs applied when a job is created
//! - **Tag constraints**: ANY/ALL predicates used to select jobs for cancellation
//! - **Cancel results**: which jobs were removed and which could not be
//! - **Job status**: the derived projection answered by status queries
//! - **Callbacks**: lifecycle observers notified off the coordinator thread
//!
//! ## Usage Example
//!
//! ```rust
//! use jobqueue_api::{Job, Params, TagConstraint};
//!
//! let job = Job::from_fn(Params::new(5).add_tags(["sync", "user-42"]), || {
//!     // do the work
//!     Ok(())
//! });
//!
//! assert_eq!(job.priority(), 5);
//! assert!(TagConstraint::All.matches(&["sync".to_string()], job.tags()));
//! ```
//!
//! ## Module Organization
//!
//! - [`job`]: job bodies, parameters and descriptors
//! - [`tags`]: tag constraints and cancellation results
//! - [`status`]: derived job status
//! - [`callback`]: lifecycle observer trait
//! - [`priority`]: mailbox message priority levels

pub mod callback;
pub mod job;
pub mod priority;
pub mod status;
pub mod tags;

pub use callback::JobManagerCallback;
pub use job::{Job, JobBody, JobId, JobInfo, Params};
pub use status::JobStatus;
pub use tags::{CancelResult, ParseTagConstraintError, TagConstraint};
