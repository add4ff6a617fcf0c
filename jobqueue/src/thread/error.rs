use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Errors related to Mailbox operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MailboxError {
    #[error("Mailbox is closed")]
    Closed,
}

/// Errors raised while validating a [`Configuration`](crate::thread::config::Configuration).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_consumer_count must be at least 1")]
    NoConsumers,
    #[error("min_consumer_count ({min}) exceeds max_consumer_count ({max})")]
    MinAboveMax { min: usize, max: usize },
    #[error("load_factor must be at least 1")]
    ZeroLoadFactor,
    #[error("consumer_keep_alive must be greater than zero")]
    ZeroKeepAlive,
}

/// Errors surfaced by the public job manager facade.
#[derive(Error, Debug)]
pub enum JobManagerError {
    /// Invalid arguments or a call from a thread that must not block.
    /// Raised before anything reaches the mailbox.
    #[error("Invalid usage: {0}")]
    Usage(String),
    /// The manager was destroyed or its coordinator thread is gone.
    #[error("Job manager has been shut down")]
    Shutdown,
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The coordinator faulted while handling the request and released
    /// the waiting caller without a result.
    #[error("Coordinator failed to process request: {0}")]
    CoordinationFault(String),
    #[error("A job with id {0} is already queued or running")]
    DuplicateJob(String),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to spawn thread: {0}")]
    Spawn(String),
}

impl From<MailboxError> for JobManagerError {
    fn from(err: MailboxError) -> Self {
        match err {
            MailboxError::Closed => JobManagerError::Shutdown,
        }
    }
}

impl JobManagerError {
    pub fn usage(message: impl Into<String>) -> Self {
        JobManagerError::Usage(message.into())
    }

    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobManagerError::Timeout(_) | JobManagerError::CoordinationFault(_))
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
