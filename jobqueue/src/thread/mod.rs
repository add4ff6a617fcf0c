#![doc = " Thread-based job execution engine: coordinator, consumers and callbacks."]

pub mod callback;
pub mod clock;
pub mod config;
pub mod consumer;
pub(crate) mod coordinator;
pub mod error;
pub(crate) mod job_queue;
pub mod mailbox;
pub mod message;
pub mod persist;
pub mod reply;

// Re-export key types for easier usage
pub use callback::CallbackManager;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BlockingForbidden, Configuration};
pub use consumer::{ConsumerStatus, ListenerId, NoConsumersListener};
pub use error::{ConfigError, JobManagerError, MailboxError};
pub use mailbox::PriorityMailbox;
pub use persist::{InMemoryPersister, JobPersister};
pub use reply::{reply_channel, ReplyError, ReplyReceiver, ReplySender};
