// Logging for the job queue engine
//
// Every thread the engine starts (coordinator, callback dispatcher, workers)
// reports through the `tracing` ecosystem with structured fields such as
// `manager`, `job_id` and `worker_id`. This module installs a subscriber and
// provides a few span/log helpers with consistent field names.
//
// # Usage Examples
//
// ```rust
// use jobqueue::logging;
//
// // INFO level, human-readable console output
// logging::init_default();
//
// logging::info!("application started");
//
// let span = jobqueue::job_span!("upload-7");
// let _guard = span.enter();
// jobqueue::log_job!("upload-7", "checkpoint", bytes = 1024);
// ```
//
// Level and per-target filters can also be set through `RUST_LOG`, which is
// read on initialisation.

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the logging subscriber
///
/// # Examples
///
/// ```rust
/// use jobqueue::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     target_filters: Some("jobqueue::thread::coordinator=trace".to_string()),
///     ..Default::default()
/// };
/// assert!(!config.json_format);
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id; engine threads are named
    /// `jq-<id>-<role>`
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',').filter(|f| !f.trim().is_empty()) {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Ignoring log filter {:?}: {}", directive, err),
            }
        }
    }
    filter
}

/// Initialize the logging system with the given configuration
///
/// Safe to call multiple times; only the first call takes effect.
///
/// # Examples
///
/// ```rust
/// use jobqueue::logging::{init, LogConfig};
///
/// init(LogConfig {
///     level: tracing::Level::DEBUG,
///     ..Default::default()
/// });
/// ```
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let fmt_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let subscriber: Box<dyn Subscriber + Send + Sync> = match (config.json_format, config.show_time) {
            (true, _) => Box::new(registry.with(fmt::layer().json().flatten_event(true))),
            (false, true) => Box::new(registry.with(fmt_layer)),
            (false, false) => Box::new(registry.with(fmt_layer.without_time())),
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` in append mode, creating it if needed
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging with both console and file output
///
/// Console output respects the ANSI setting of the terminal; the file always
/// gets plain text with file/line and thread information.
///
/// # Errors
/// Returns an error if the log file cannot be opened. Nothing is installed
/// in that case, so a later call may still succeed.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    // Fail before the Once is consumed.
    drop(file_writer(log_file)?);

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human-readable console output
pub fn init_default() {
    init(LogConfig::default());
}

/// DEBUG everywhere, TRACE for the coordinator and its workers
pub fn init_development() {
    init(development_config());
}

fn development_config() -> LogConfig {
    LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("jobqueue=debug,jobqueue::thread=trace".to_string()),
    }
}

/// Development settings, also written to `path`
pub fn init_development_with_file(path: &str) -> Result<(), io::Error> {
    init_with_file(development_config(), path)
}

/// JSON output at INFO level for log aggregators; no file/line information
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Warnings and errors only, compact output
///
/// ```rust
/// #[test]
/// fn my_test() {
///     jobqueue::logging::init_test();
///     // ...
/// }
/// ```
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span covering work on one job
///
/// ```rust
/// let span = jobqueue::job_span!("upload-7");
/// let _guard = span.enter();
///
/// let span = jobqueue::job_span!("upload-7", worker_id = 2);
/// ```
#[macro_export]
macro_rules! job_span {
    ($job_id:expr) => {
        tracing::info_span!("job", job_id = %$job_id)
    };
    ($job_id:expr, $($fields:tt)*) => {
        tracing::info_span!("job", job_id = %$job_id, $($fields)*)
    };
}

/// Job lifecycle event at DEBUG level
///
/// ```rust
/// jobqueue::log_job!("upload-7", "added");
/// jobqueue::log_job!("upload-7", "handed_to_consumer", worker_id = 3);
/// ```
#[macro_export]
macro_rules! log_job {
    ($job_id:expr, $event:expr) => {
        tracing::debug!(job_id = %$job_id, event = $event)
    };
    ($job_id:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(job_id = %$job_id, event = $event, $($fields)*)
    };
}

/// Coordinator state change at INFO level
///
/// ```rust
/// jobqueue::log_coordinator!("default", "started");
/// jobqueue::log_coordinator!("default", "stopped", abandoned = 0);
/// ```
#[macro_export]
macro_rules! log_coordinator {
    ($manager:expr, $event:expr) => {
        tracing::info!(manager = %$manager, event = $event)
    };
    ($manager:expr, $event:expr, $($fields:tt)*) => {
        tracing::info!(manager = %$manager, event = $event, $($fields)*)
    };
}

/// Error with optional context fields
///
/// ```rust
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
/// jobqueue::log_error!(error, component = "persister");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}

pub use tracing::{debug, error, info, trace, warn};
