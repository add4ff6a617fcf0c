//! # Tag Constraints and Cancellation Results
//!
//! Cancellation selects jobs by tag rather than by id. A [`TagConstraint`]
//! decides whether a job's tag set matches the tags named in a request, and
//! a [`CancelResult`] reports what the coordinator did with every match.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::job::JobId;

/// How the tags of a cancel request are matched against a job's tags.
///
/// An empty request tag list never matches anything, for either variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagConstraint {
    /// The job carries at least one of the requested tags.
    Any,
    /// The job carries every requested tag.
    All,
}

impl TagConstraint {
    pub fn matches(&self, requested: &[String], job_tags: &BTreeSet<String>) -> bool {
        if requested.is_empty() {
            return false;
        }
        match self {
            TagConstraint::Any => requested.iter().any(|tag| job_tags.contains(tag)),
            TagConstraint::All => requested.iter().all(|tag| job_tags.contains(tag)),
        }
    }
}

impl fmt::Display for TagConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagConstraint::Any => write!(f, "any"),
            TagConstraint::All => write!(f, "all"),
        }
    }
}

/// Error returned when parsing an unknown tag constraint name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown tag constraint: {0} (expected \"any\" or \"all\")")]
pub struct ParseTagConstraintError(pub String);

impl FromStr for TagConstraint {
    type Err = ParseTagConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(TagConstraint::Any),
            "all" => Ok(TagConstraint::All),
            _ => Err(ParseTagConstraintError(s.to_string())),
        }
    }
}

/// Outcome of a cancel request.
///
/// The two lists are disjoint and keep the order in which the coordinator
/// visited the matching jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelResult {
    cancelled: Vec<JobId>,
    failed_to_cancel: Vec<JobId>,
}

impl CancelResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs removed before they started running.
    pub fn cancelled(&self) -> &[JobId] {
        &self.cancelled
    }

    /// Jobs that were already running when the request was processed.
    pub fn failed_to_cancel(&self) -> &[JobId] {
        &self.failed_to_cancel
    }

    pub fn add_cancelled(&mut self, id: impl Into<JobId>) {
        self.cancelled.push(id.into());
    }

    pub fn add_failed_to_cancel(&mut self, id: impl Into<JobId>) {
        self.failed_to_cancel.push(id.into());
    }

    /// True when the request matched no job at all.
    pub fn is_empty(&self) -> bool {
        self.cancelled.is_empty() && self.failed_to_cancel.is_empty()
    }
}
