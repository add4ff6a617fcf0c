use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use jobqueue_api::{
    priority, CancelResult, Job, JobBody, JobInfo, JobManagerCallback, JobStatus, Params,
    TagConstraint,
};

struct Flagged {
    cancelled: Arc<AtomicBool>,
}

impl JobBody for Flagged {
    fn run(&self) -> anyhow::Result<()> {
        anyhow::bail!("not today")
    }

    fn on_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_custom_body_hooks() {
    let cancelled = Arc::new(AtomicBool::new(false));
    let job = Job::new(
        Params::new(2).with_id("custom"),
        Flagged {
            cancelled: Arc::clone(&cancelled),
        },
    );

    assert_eq!(job.body().run().unwrap_err().to_string(), "not today");
    job.body().on_cancel();
    assert!(cancelled.load(Ordering::SeqCst));
}

#[test]
fn test_job_accessors() {
    let job = Job::from_fn(
        Params::new(-1)
            .with_id("acc")
            .add_tags(["x", "y", "x"])
            .group_by("g")
            .delay(Duration::from_millis(5)),
        || Ok(()),
    );

    assert_eq!(job.id(), "acc");
    assert_eq!(job.priority(), -1);
    assert_eq!(job.tags().len(), 2);
    assert_eq!(job.group_id(), Some("g"));
    assert_eq!(job.delay(), Some(Duration::from_millis(5)));
    assert!(!job.is_persistent());
    assert_eq!(job.info().id, "acc");
}

#[test]
fn test_default_callback_methods_are_no_ops() {
    struct Silent;
    impl JobManagerCallback for Silent {}

    let info = JobInfo::from(Params::new(0).with_id("quiet"));
    let observer: Arc<dyn JobManagerCallback> = Arc::new(Silent);
    observer.on_job_added(&info);
    observer.on_job_run(&info);
    observer.on_job_succeeded(&info);
    observer.on_job_failed(&info, &anyhow::anyhow!("ignored"));
    observer.on_job_cancelled(&info);
    observer.on_done(&info);
}

#[test]
fn test_cancel_result_keeps_visit_order() {
    let mut result = CancelResult::new();
    assert!(result.is_empty());

    result.add_cancelled("b");
    result.add_cancelled("a");
    result.add_failed_to_cancel("c");

    assert_eq!(result.cancelled(), ["b".to_string(), "a".to_string()]);
    assert_eq!(result.failed_to_cancel(), ["c".to_string()]);
    assert!(!result.is_empty());
}

#[test]
fn test_serialized_shapes() {
    let info = JobInfo::from(Params::new(4).with_id("s").add_tags(["t"]).persist());
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["id"], "s");
    assert_eq!(json["priority"], 4);
    assert_eq!(json["tags"][0], "t");
    assert_eq!(json["persistent"], true);

    let back: JobInfo = serde_json::from_value(json).unwrap();
    assert_eq!(back, info);

    assert_eq!(serde_json::to_string(&TagConstraint::All).unwrap(), "\"All\"");
    assert_eq!(serde_json::to_string(&JobStatus::Cancelled).unwrap(), "\"Cancelled\"");
}

#[test]
fn test_status_and_constraint_display() {
    assert_eq!(JobStatus::Pending.to_string(), "pending");
    assert_eq!(JobStatus::Unknown.to_string(), "unknown");
    assert_eq!(TagConstraint::Any.to_string(), "any");
}

#[test]
fn test_priority_levels_order_control_messages() {
    assert_eq!(priority::LEVELS[0], priority::CRITICAL);
    assert!(priority::HIGH > priority::NORMAL);
    assert!(priority::LOW > priority::BACKGROUND);
}
