use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of a job as seen by the coordinator at the moment of the query.
///
/// Status is derived on demand from the coordinator's state; it is never
/// stored per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Never seen, already finished, or dropped by `clear`.
    Unknown,
    /// Waiting in the queue, whether or not it is ready to run yet.
    Pending,
    /// Handed to a worker.
    Running,
    /// Removed by a cancel request before it ran.
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Unknown => "unknown",
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}
