//! Pending-job store owned by the coordinator.
//!
//! Jobs are ordered by descending job priority and then by insertion order.
//! A pending job is *ready* when its delay has elapsed and no other job of
//! its group is running; readiness is always evaluated against the caller's
//! notion of "now" and the current set of busy groups.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use jobqueue_api::{JobBody, JobId, JobInfo, TagConstraint};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

pub(crate) struct PendingJob {
    pub info: JobInfo,
    pub body: Arc<dyn JobBody>,
    /// `None` for jobs without a delay.
    pub ready_at: Option<Instant>,
    key: QueueKey,
}

impl PendingJob {
    fn is_ready(&self, now: Instant, busy_groups: &HashSet<String>) -> bool {
        let delay_elapsed = self.ready_at.is_none_or(|at| at <= now);
        let group_free = self
            .info
            .group_id
            .as_ref()
            .is_none_or(|group| !busy_groups.contains(group));
        delay_elapsed && group_free
    }
}

#[derive(Default)]
pub(crate) struct JobQueue {
    entries: BTreeMap<QueueKey, PendingJob>,
    index: HashMap<JobId, QueueKey>,
    next_seq: u64,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: JobInfo, body: Arc<dyn JobBody>, ready_at: Option<Instant>) {
        let key = QueueKey {
            priority: Reverse(info.priority),
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.index.insert(info.id.clone(), key);
        self.entries.insert(
            key,
            PendingJob {
                info,
                body,
                ready_at,
                key,
            },
        );
    }

    /// Puts a job taken out by [`take_next_ready`](Self::take_next_ready)
    /// back at its original position.
    pub fn restore(&mut self, job: PendingJob) {
        self.index.insert(job.info.id.clone(), job.key);
        self.entries.insert(job.key, job);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingJob> {
        let key = self.index.remove(id)?;
        self.entries.remove(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_ready(&self, now: Instant, busy_groups: &HashSet<String>) -> usize {
        self.entries
            .values()
            .filter(|job| job.is_ready(now, busy_groups))
            .count()
    }

    /// Removes and returns the highest-priority ready job.
    pub fn take_next_ready(
        &mut self,
        now: Instant,
        busy_groups: &HashSet<String>,
    ) -> Option<PendingJob> {
        let key = self
            .entries
            .values()
            .find(|job| job.is_ready(now, busy_groups))
            .map(|job| job.key)?;
        let job = self.entries.remove(&key)?;
        self.index.remove(&job.info.id);
        Some(job)
    }

    /// Earliest future instant at which a delayed job becomes ready.
    pub fn next_ready_at(&self, now: Instant) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|job| job.ready_at)
            .filter(|at| *at > now)
            .min()
    }

    /// Ids of pending jobs matching a tag constraint, in queue order.
    pub fn matching(&self, constraint: TagConstraint, tags: &[String]) -> Vec<JobId> {
        self.entries
            .values()
            .filter(|job| constraint.matches(tags, &job.info.tags))
            .map(|job| job.info.id.clone())
            .collect()
    }

    /// Removes every pending job, in queue order.
    pub fn clear(&mut self) -> Vec<PendingJob> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobqueue_api::Params;
    use std::time::Duration;

    fn push(queue: &mut JobQueue, params: Params, ready_at: Option<Instant>) {
        let info = JobInfo::from(params);
        let body: Arc<dyn JobBody> = Arc::new(|| -> anyhow::Result<()> { Ok(()) });
        queue.insert(info, body, ready_at);
    }

    fn drain_ids(queue: &mut JobQueue, now: Instant) -> Vec<String> {
        let busy = HashSet::new();
        std::iter::from_fn(|| queue.take_next_ready(now, &busy))
            .map(|job| job.info.id)
            .collect()
    }

    #[test]
    fn test_priority_then_fifo_order() {
        let mut queue = JobQueue::new();
        push(&mut queue, Params::new(1).with_id("p1"), None);
        push(&mut queue, Params::new(5).with_id("p5"), None);
        push(&mut queue, Params::new(3).with_id("p3"), None);
        push(&mut queue, Params::new(5).with_id("p5b"), None);

        assert_eq!(queue.len(), 4);
        assert_eq!(drain_ids(&mut queue, Instant::now()), vec!["p5", "p5b", "p3", "p1"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_delayed_job_is_pending_but_not_ready() {
        let mut queue = JobQueue::new();
        let now = Instant::now();
        let later = now + Duration::from_secs(10);
        push(&mut queue, Params::new(9).with_id("late"), Some(later));
        push(&mut queue, Params::new(1).with_id("now"), None);

        let busy = HashSet::new();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.count_ready(now, &busy), 1);
        assert_eq!(queue.next_ready_at(now), Some(later));
        assert_eq!(drain_ids(&mut queue, now), vec!["now"]);
        assert_eq!(queue.count_ready(later, &busy), 1);
        assert_eq!(queue.next_ready_at(later), None);
    }

    #[test]
    fn test_busy_group_blocks_readiness() {
        let mut queue = JobQueue::new();
        push(&mut queue, Params::new(5).with_id("g1").group_by("g"), None);
        push(&mut queue, Params::new(1).with_id("free"), None);

        let busy: HashSet<String> = ["g".to_string()].into_iter().collect();
        let now = Instant::now();
        assert_eq!(queue.count_ready(now, &busy), 1);
        let next = queue.take_next_ready(now, &busy).unwrap();
        assert_eq!(next.info.id, "free");
        assert!(queue.take_next_ready(now, &busy).is_none());
        assert!(queue.contains("g1"));
    }

    #[test]
    fn test_restore_keeps_position() {
        let mut queue = JobQueue::new();
        push(&mut queue, Params::new(2).with_id("a"), None);
        push(&mut queue, Params::new(2).with_id("b"), None);

        let now = Instant::now();
        let first = queue.take_next_ready(now, &HashSet::new()).unwrap();
        queue.restore(first);
        assert_eq!(drain_ids(&mut queue, now), vec!["a", "b"]);
    }

    #[test]
    fn test_matching_remove_and_clear() {
        let mut queue = JobQueue::new();
        push(&mut queue, Params::new(1).with_id("a").add_tags(["x"]), None);
        push(&mut queue, Params::new(3).with_id("b").add_tags(["x", "y"]), None);
        push(&mut queue, Params::new(2).with_id("c").add_tags(["y"]), None);

        let xs = queue.matching(TagConstraint::Any, &["x".to_string()]);
        assert_eq!(xs, vec!["b", "a"]);
        let both = queue.matching(TagConstraint::All, &["x".to_string(), "y".to_string()]);
        assert_eq!(both, vec!["b"]);

        assert!(queue.remove("b").is_some());
        assert!(queue.remove("b").is_none());
        assert!(!queue.contains("b"));

        let cleared: Vec<_> = queue.clear().into_iter().map(|job| job.info.id).collect();
        assert_eq!(cleared, vec!["c", "a"]);
        assert!(queue.is_empty());
        assert!(!queue.contains("a"));
    }
}
