//! Queues a handful of prioritized jobs, runs them and prints lifecycle
//! events as an observer sees them.
//!
//! Run with `RUST_LOG=debug` for coordinator and consumer logs.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use jobqueue::logging::{self, LogConfig};
use jobqueue::{Configuration, Job, JobInfo, JobManager, JobManagerCallback, Params};

struct Printer;

impl JobManagerCallback for Printer {
    fn on_job_run(&self, job: &JobInfo) {
        println!("run       {} (priority {})", job.id, job.priority);
    }

    fn on_job_succeeded(&self, job: &JobInfo) {
        println!("succeeded {}", job.id);
    }

    fn on_job_failed(&self, job: &JobInfo, error: &anyhow::Error) {
        println!("failed    {}: {}", job.id, error);
    }
}

fn main() -> anyhow::Result<()> {
    logging::init(LogConfig::default());

    let manager = JobManager::new(Configuration {
        id: "demo".to_string(),
        max_consumer_count: 2,
        consumer_keep_alive: Duration::from_millis(200),
        ..Default::default()
    })?;
    manager.add_callback(Arc::new(Printer))?;

    for (id, priority) in [("thumbnail", 1), ("upload", 10), ("index", 5), ("email", 5)] {
        manager.add_job_sync(Job::from_fn(Params::new(priority).with_id(id), move || {
            thread::sleep(Duration::from_millis(50));
            Ok(())
        }))?;
    }
    manager.add_job_sync(Job::from_fn(Params::new(0).with_id("flaky"), || {
        anyhow::bail!("remote refused the connection")
    }))?;
    manager.add_job_sync(Job::from_fn(
        Params::new(0).with_id("reminder").delay(Duration::from_millis(300)),
        || Ok(()),
    ))?;

    println!(
        "queued {} jobs, {} ready",
        manager.count()?,
        manager.count_ready_jobs()?
    );
    manager.start()?;
    manager.count()?;
    manager.wait_until_consumers_are_finished()?;
    manager.destroy()?;
    Ok(())
}
