use std::fmt;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::thread::clock::{Clock, SystemClock};
use crate::thread::error::ConfigError;
use crate::thread::persist::JobPersister;

pub const DEFAULT_MAX_CONSUMER_COUNT: usize = 5;
pub const DEFAULT_LOAD_FACTOR: usize = 3;
pub const DEFAULT_CONSUMER_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Predicate answering "is the current thread one that must never block".
pub type BlockingForbidden = Arc<dyn Fn() -> bool + Send + Sync>;

/// Configuration for a [`JobManager`](crate::JobManager).
#[derive(Clone)]
pub struct Configuration {
    /// Name used in thread names and log fields.
    pub id: String,

    /// Workers kept alive while the manager is running, even when idle.
    pub min_consumer_count: usize,

    /// Upper bound on concurrently alive workers.
    pub max_consumer_count: usize,

    /// Number of ready plus running jobs a single worker is expected to
    /// absorb before another worker is spawned.
    pub load_factor: usize,

    /// How long an idle worker waits for work before offering to exit.
    pub consumer_keep_alive: Duration,

    /// Start in the running state instead of stopped.
    pub auto_start: bool,

    /// Bound applied to every synchronous call; `None` waits indefinitely.
    pub query_timeout: Option<Duration>,

    /// Thread that must never block (for example a UI thread). Synchronous
    /// calls made on it fail with a usage error.
    pub blocking_forbidden: Option<BlockingForbidden>,

    /// Time source for job delays.
    pub clock: Arc<dyn Clock>,

    /// Optional persistence collaborator for jobs created with `persist()`.
    pub persister: Option<Arc<dyn JobPersister>>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            min_consumer_count: 0,
            max_consumer_count: num_cpus::get().min(DEFAULT_MAX_CONSUMER_COUNT),
            load_factor: DEFAULT_LOAD_FACTOR,
            consumer_keep_alive: DEFAULT_CONSUMER_KEEP_ALIVE,
            auto_start: false,
            query_timeout: None,
            blocking_forbidden: None,
            clock: Arc::new(SystemClock),
            persister: None,
        }
    }
}

impl Configuration {
    /// Checks the numeric settings for consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_consumer_count == 0 {
            return Err(ConfigError::NoConsumers);
        }
        if self.min_consumer_count > self.max_consumer_count {
            return Err(ConfigError::MinAboveMax {
                min: self.min_consumer_count,
                max: self.max_consumer_count,
            });
        }
        if self.load_factor == 0 {
            return Err(ConfigError::ZeroLoadFactor);
        }
        if self.consumer_keep_alive.is_zero() {
            return Err(ConfigError::ZeroKeepAlive);
        }
        Ok(())
    }

    /// Forbids blocking calls on the thread that calls this method.
    ///
    /// Typically invoked on the UI or event-loop thread while building the
    /// configuration.
    pub fn forbid_blocking_on_current_thread(self) -> Self {
        let id = thread::current().id();
        self.forbid_blocking_on(id)
    }

    /// Forbids blocking calls on the given thread.
    pub fn forbid_blocking_on(mut self, id: ThreadId) -> Self {
        self.blocking_forbidden = Some(Arc::new(move || thread::current().id() == id));
        self
    }

    pub(crate) fn thread_name(&self, role: &str) -> String {
        format!("jq-{}-{}", self.id, role)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("id", &self.id)
            .field("min_consumer_count", &self.min_consumer_count)
            .field("max_consumer_count", &self.max_consumer_count)
            .field("load_factor", &self.load_factor)
            .field("consumer_keep_alive", &self.consumer_keep_alive)
            .field("auto_start", &self.auto_start)
            .field("query_timeout", &self.query_timeout)
            .field("blocking_forbidden", &self.blocking_forbidden.is_some())
            .field("clock", &self.clock)
            .field("persister", &self.persister.is_some())
            .finish()
    }
}
