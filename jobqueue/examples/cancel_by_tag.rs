//! Cancels queued jobs by tag while one matching job is already running.

use std::thread;
use std::time::Duration;

use jobqueue::logging;
use jobqueue::{Configuration, Job, JobManager, Params, TagConstraint};

fn main() -> anyhow::Result<()> {
    logging::init_development();

    let manager = JobManager::new(Configuration {
        id: "cancel-demo".to_string(),
        max_consumer_count: 1,
        ..Default::default()
    })?;

    let (started_tx, started_rx) = flume::bounded(1);
    manager.add_job_sync(Job::from_fn(
        Params::new(10).with_id("sync-user-1").add_tags(["sync", "user-1"]),
        move || {
            let _ = started_tx.send(());
            thread::sleep(Duration::from_millis(200));
            Ok(())
        },
    ))?;
    for (id, tags) in [
        ("sync-user-2", ["sync", "user-2"]),
        ("upload-user-1", ["upload", "user-1"]),
        ("sync-user-3", ["sync", "user-3"]),
    ] {
        manager.add_job_sync(Job::from_fn(Params::new(1).with_id(id).add_tags(tags), || Ok(())))?;
    }

    manager.start()?;
    started_rx.recv()?;

    let result = manager.cancel_jobs_sync(TagConstraint::Any, ["sync"])?;
    println!("cancelled:        {:?}", result.cancelled());
    println!("failed to cancel: {:?}", result.failed_to_cancel());

    manager.stop_and_wait_until_consumers_are_finished()?;
    println!("left in queue:    {}", manager.count()?);
    manager.destroy()?;
    Ok(())
}
