use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use jobqueue::{Job, JobManager, ManualClock, Params};

use test_helpers::*;

#[test]
fn test_wait_until_consumers_are_finished_runs_everything() {
    let mut config = test_config("drain");
    config.auto_start = true;
    let manager = manager(config);
    let recorder = Recorder::new();
    manager.add_callback(recorder.clone()).unwrap();

    for i in 0..10 {
        manager.add_job_sync(noop_job(&format!("j{}", i), i)).unwrap();
    }
    manager.wait_until_consumers_are_finished().unwrap();

    assert_eq!(recorder.count("succeeded"), 10);
    assert_eq!(manager.count().unwrap(), 0);
    assert_eq!(manager.active_consumer_count().unwrap(), 0);
    manager.destroy().unwrap();
}

#[test]
fn test_wait_returns_immediately_without_consumers() {
    let manager = manager(test_config("idle-wait"));
    manager.add_job_sync(noop_job("never", 1)).unwrap();

    manager.wait_until_consumers_are_finished().unwrap();
    assert_eq!(manager.count().unwrap(), 1);
    manager.destroy().unwrap();
}

#[test]
fn test_stop_and_wait_leaves_pending_jobs_queued() {
    let mut config = test_config("stop-wait");
    config.max_consumer_count = 1;
    let manager = manager(config);
    let gate = Gate::new();

    manager
        .add_job_sync(gate.job(Params::new(10).with_id("running")))
        .unwrap();
    manager.add_job_sync(noop_job("left-1", 1)).unwrap();
    manager.add_job_sync(noop_job("left-2", 1)).unwrap();
    manager.start().unwrap();
    gate.wait_entered();

    let opener = gate.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        opener.open();
    });
    manager.stop_and_wait_until_consumers_are_finished().unwrap();
    handle.join().unwrap();

    assert_eq!(manager.active_consumer_count().unwrap(), 0);
    assert_eq!(manager.count().unwrap(), 2);

    // Restarting picks the leftovers up.
    manager.start().unwrap();
    manager.count().unwrap();
    manager.wait_until_consumers_are_finished().unwrap();
    assert_eq!(manager.count().unwrap(), 0);
    manager.destroy().unwrap();
}

#[test]
fn test_idle_consumers_retire_after_keep_alive() {
    let mut config = test_config("keep-alive");
    config.auto_start = true;
    let manager = manager(config);

    manager.add_job_sync(noop_job("one", 1)).unwrap();
    assert!(manager.active_consumer_count().unwrap() >= 1);
    assert!(wait_until(DEFAULT_WAIT, || {
        manager.active_consumer_count().unwrap() == 0
    }));
    manager.destroy().unwrap();
}

#[test]
fn test_min_consumers_stay_alive() {
    let mut config = test_config("min-consumers");
    config.auto_start = true;
    config.min_consumer_count = 1;
    let manager = manager(config);

    assert!(wait_until(DEFAULT_WAIT, || {
        manager.active_consumer_count().unwrap() == 1
    }));
    manager.add_job_sync(noop_job("one", 1)).unwrap();
    thread::sleep(Duration::from_millis(400));
    assert_eq!(manager.active_consumer_count().unwrap(), 1);

    manager.stop_and_wait_until_consumers_are_finished().unwrap();
    assert_eq!(manager.active_consumer_count().unwrap(), 0);
    manager.destroy().unwrap();
}

#[test]
fn test_pool_never_exceeds_max() {
    let mut config = test_config("max-consumers");
    config.max_consumer_count = 3;
    config.load_factor = 1;
    let manager = manager(config);
    let gate = Gate::new();

    for i in 0..6 {
        manager
            .add_job_sync(gate.job(Params::new(1).with_id(format!("g{}", i))))
            .unwrap();
    }
    manager.start().unwrap();
    for _ in 0..3 {
        gate.wait_entered();
    }
    assert_eq!(manager.active_consumer_count().unwrap(), 3);
    assert_eq!(manager.count().unwrap(), 3);

    for _ in 0..6 {
        gate.open();
    }
    manager.wait_until_consumers_are_finished().unwrap();
    assert_eq!(manager.count().unwrap(), 0);
    manager.destroy().unwrap();
}

#[test]
fn test_no_consumers_listener_fires_when_pool_empties() {
    let mut config = test_config("no-consumers");
    config.auto_start = true;
    let manager = manager(config);
    let fired = Arc::new(AtomicUsize::new(0));

    let seen = Arc::clone(&fired);
    let id = manager.add_no_consumers_listener(Arc::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    }));

    manager.add_job_sync(noop_job("one", 1)).unwrap();
    assert!(wait_until(DEFAULT_WAIT, || fired.load(Ordering::SeqCst) == 1));

    assert!(manager.remove_no_consumers_listener(id));
    manager.add_job_sync(noop_job("two", 1)).unwrap();
    manager.wait_until_consumers_are_finished().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    manager.destroy().unwrap();
}

#[test]
fn test_group_jobs_never_overlap() {
    let mut config = test_config("groups");
    config.max_consumer_count = 3;
    config.load_factor = 1;
    let manager = manager(config);
    let active = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));
    let log = Arc::new(Mutex::new(Vec::new()));

    for i in 0..4 {
        let active = Arc::clone(&active);
        let overlap = Arc::clone(&overlap);
        let log = Arc::clone(&log);
        let id = format!("g{}", i);
        manager
            .add_job_sync(Job::from_fn(
                Params::new(1).with_id(id.clone()).group_by("serial"),
                move || {
                    if active.fetch_add(1, Ordering::SeqCst) > 0 {
                        overlap.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::sleep(Duration::from_millis(20));
                    log.lock().unwrap().push(id.clone());
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
            ))
            .unwrap();
    }
    manager.add_job_sync(noop_job("free", 1)).unwrap();
    assert_eq!(manager.count_ready_jobs().unwrap(), 5);

    manager.start().unwrap();
    manager.count().unwrap();
    manager.wait_until_consumers_are_finished().unwrap();

    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert_eq!(*log.lock().unwrap(), vec!["g0", "g1", "g2", "g3"]);
    manager.destroy().unwrap();
}

#[test]
fn test_delayed_job_waits_before_running() {
    let mut config = test_config("delay");
    config.auto_start = true;
    let manager = manager(config);
    let recorder = Recorder::new();
    manager.add_callback(recorder.clone()).unwrap();

    manager
        .add_job_sync(Job::from_fn(
            Params::new(1).with_id("later").delay(Duration::from_millis(300)),
            || Ok(()),
        ))
        .unwrap();
    assert_eq!(manager.count().unwrap(), 1);
    assert_eq!(manager.count_ready_jobs().unwrap(), 0);
    assert!(recorder.events_for("later").iter().all(|e| e != "run:later"));

    recorder.wait_for("succeeded", 1);
    assert_eq!(manager.count().unwrap(), 0);
    manager.destroy().unwrap();
}

#[test]
fn test_manual_clock_controls_readiness() {
    let clock = Arc::new(ManualClock::new());
    let mut config = test_config("manual-clock");
    config.clock = clock.clone();
    let manager = manager(config);

    manager
        .add_job_sync(Job::from_fn(
            Params::new(1).with_id("hour").delay(Duration::from_secs(3600)),
            || Ok(()),
        ))
        .unwrap();
    manager.add_job_sync(noop_job("now", 1)).unwrap();
    assert_eq!(manager.count_ready_jobs().unwrap(), 1);

    clock.advance(Duration::from_secs(3601));
    assert_eq!(manager.count_ready_jobs().unwrap(), 2);
    manager.destroy().unwrap();
}

fn run_burst(manager: &JobManager, prefix: &str, n: i32) {
    for i in 0..n {
        manager
            .add_job_async(noop_job(&format!("{}-{}", prefix, i), i % 3))
            .unwrap();
    }
}

#[test]
fn test_async_burst_is_fully_processed() {
    let mut config = test_config("burst");
    config.auto_start = true;
    config.max_consumer_count = 4;
    let manager = manager(config);
    let recorder = Recorder::new();
    manager.add_callback(recorder.clone()).unwrap();

    run_burst(&manager, "a", 50);
    run_burst(&manager, "b", 50);
    recorder.wait_for("done", 100);
    assert_eq!(recorder.count("failed"), 0);
    manager.destroy().unwrap();
}
