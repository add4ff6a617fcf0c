use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use flume::Sender;
use tracing::{debug, info, warn};

use super::status::ConsumerStatus;
use super::worker::{Worker, WorkerCommand};
use crate::thread::config::Configuration;
use crate::thread::error::JobManagerError;
use crate::thread::mailbox::PriorityMailbox;
use crate::thread::message::{RunnableJob, WorkerId};

/// Pool sizing knobs, copied out of the configuration.
#[derive(Debug, Clone)]
pub(crate) struct ConsumerSettings {
    pub min: usize,
    pub max: usize,
    pub load_factor: usize,
    pub keep_alive: Duration,
    pub name_prefix: String,
}

impl From<&Configuration> for ConsumerSettings {
    fn from(config: &Configuration) -> Self {
        Self {
            min: config.min_consumer_count,
            max: config.max_consumer_count,
            load_factor: config.load_factor,
            keep_alive: config.consumer_keep_alive,
            name_prefix: config.thread_name("worker"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Spawned, has not reported idle yet.
    Starting,
    Idle,
    Busy,
}

struct WorkerSlot {
    commands: Sender<WorkerCommand>,
    state: SlotState,
    handle: JoinHandle<()>,
}

/// Worker bookkeeping owned by the coordinator thread.
///
/// Every spawn and retirement goes through here, and each one republishes
/// the worker count on the shared [`ConsumerStatus`].
pub(crate) struct ConsumerManager {
    settings: ConsumerSettings,
    mailbox: Arc<PriorityMailbox>,
    status: Arc<ConsumerStatus>,
    workers: HashMap<WorkerId, WorkerSlot>,
    idle: VecDeque<WorkerId>,
    retired: Vec<JoinHandle<()>>,
    next_id: WorkerId,
}

impl ConsumerManager {
    pub fn new(
        settings: ConsumerSettings,
        mailbox: Arc<PriorityMailbox>,
        status: Arc<ConsumerStatus>,
    ) -> Self {
        Self {
            settings,
            mailbox,
            status,
            workers: HashMap::new(),
            idle: VecDeque::new(),
            retired: Vec::new(),
            next_id: 0,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    pub fn is_idle(&self, worker: WorkerId) -> bool {
        self.workers
            .get(&worker)
            .is_some_and(|slot| slot.state == SlotState::Idle)
    }

    /// Spawns workers while the pool is below its minimum or the load per
    /// worker exceeds the load factor.
    pub fn grow(&mut self, ready: usize, busy: usize) {
        while self.should_grow(ready, busy) {
            if let Err(err) = self.spawn() {
                warn!(error = %err, "could not add a consumer");
                break;
            }
        }
    }

    fn should_grow(&self, ready: usize, busy: usize) -> bool {
        let count = self.workers.len();
        if count < self.settings.min {
            return true;
        }
        count < self.settings.max && count * self.settings.load_factor < ready + busy
    }

    fn spawn(&mut self) -> Result<WorkerId, JobManagerError> {
        let id = self.next_id;
        let (commands, inbox) = flume::unbounded();
        let worker = Worker::new(id, Arc::clone(&self.mailbox), inbox, self.settings.keep_alive);
        let handle = worker.spawn(format!("{}-{}", self.settings.name_prefix, id))?;
        self.next_id += 1;
        self.workers.insert(
            id,
            WorkerSlot {
                commands,
                state: SlotState::Starting,
                handle,
            },
        );
        self.publish_count();
        debug!(worker_id = id, workers = self.workers.len(), "consumer spawned");
        Ok(id)
    }

    /// Records that a worker is waiting for work.
    ///
    /// Returns false for a worker no longer in the pool. A worker retired
    /// while still starting reports idle once before it reads `Exit`.
    pub fn mark_idle(&mut self, worker: WorkerId) -> bool {
        match self.workers.get_mut(&worker) {
            Some(slot) => {
                if slot.state != SlotState::Idle {
                    slot.state = SlotState::Idle;
                    self.idle.push_back(worker);
                }
                true
            }
            None if worker < self.next_id => {
                debug!(worker_id = worker, "idle report from retired consumer");
                false
            }
            None => {
                warn!(worker_id = worker, "idle report from unknown consumer");
                false
            }
        }
    }

    /// Hands a job to the longest-idle worker.
    ///
    /// Gives the job back when no idle worker could take it.
    pub fn assign(&mut self, job: RunnableJob) -> Result<WorkerId, RunnableJob> {
        while let Some(worker) = self.idle.pop_front() {
            let Some(slot) = self.workers.get_mut(&worker) else {
                continue;
            };
            if slot.state != SlotState::Idle {
                continue;
            }
            if slot.commands.send(WorkerCommand::Run(job.clone())).is_ok() {
                slot.state = SlotState::Busy;
                return Ok(worker);
            }
            warn!(worker_id = worker, "consumer vanished, dropping it from the pool");
            self.forget(worker);
        }
        Err(job)
    }

    /// Tells an idle worker whose keep-alive expired to keep waiting.
    pub fn keep_waiting(&mut self, worker: WorkerId) {
        if let Some(slot) = self.workers.get(&worker) {
            if slot.commands.send(WorkerCommand::KeepWaiting).is_err() {
                self.forget(worker);
            }
        }
    }

    /// Whether retiring one more worker keeps the pool at its minimum.
    pub fn above_minimum(&self) -> bool {
        self.workers.len() > self.settings.min
    }

    /// Sends `Exit` to a worker and removes it from the pool.
    pub fn retire(&mut self, worker: WorkerId) {
        if let Some(slot) = self.workers.remove(&worker) {
            self.idle.retain(|id| *id != worker);
            let _ = slot.commands.send(WorkerCommand::Exit);
            self.retired.retain(|handle| !handle.is_finished());
            self.retired.push(slot.handle);
            self.publish_count();
            debug!(worker_id = worker, workers = self.workers.len(), "consumer retired");
        }
    }

    /// Retires every worker that is not running a job.
    pub fn retire_idle(&mut self) {
        let idle: Vec<_> = self
            .workers
            .iter()
            .filter(|(_, slot)| slot.state != SlotState::Busy)
            .map(|(id, _)| *id)
            .collect();
        for worker in idle {
            self.retire(worker);
        }
    }

    /// Drops a worker whose thread is already gone.
    fn forget(&mut self, worker: WorkerId) {
        if let Some(slot) = self.workers.remove(&worker) {
            self.idle.retain(|id| *id != worker);
            self.retired.push(slot.handle);
            self.publish_count();
        }
    }

    /// Releases every worker and joins the ones not stuck in a job.
    ///
    /// Busy workers are detached; they exit once their report hits the
    /// closed mailbox.
    pub fn shutdown(&mut self) {
        let mut joinable = std::mem::take(&mut self.retired);
        let mut detached = 0;
        for (_, slot) in self.workers.drain() {
            let _ = slot.commands.send(WorkerCommand::Exit);
            if slot.state == SlotState::Busy {
                detached += 1;
            } else {
                joinable.push(slot.handle);
            }
        }
        self.idle.clear();
        self.publish_count();
        for handle in joinable {
            if handle.join().is_err() {
                warn!("consumer thread panicked");
            }
        }
        info!(detached, "consumers released");
    }

    fn publish_count(&self) {
        self.status.set_worker_count(self.workers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::message::Message;

    fn settings(min: usize, max: usize, load_factor: usize) -> ConsumerSettings {
        ConsumerSettings {
            min,
            max,
            load_factor,
            keep_alive: Duration::from_secs(30),
            name_prefix: "jq-test-worker".to_string(),
        }
    }

    fn manager(settings: ConsumerSettings) -> (ConsumerManager, Arc<PriorityMailbox>, Arc<ConsumerStatus>) {
        let mailbox = Arc::new(PriorityMailbox::new());
        let status = Arc::new(ConsumerStatus::new());
        let manager = ConsumerManager::new(settings, Arc::clone(&mailbox), Arc::clone(&status));
        (manager, mailbox, status)
    }

    #[test]
    fn test_growth_follows_load_factor() {
        let (mut pool, _mailbox, status) = manager(settings(0, 3, 2));
        pool.grow(0, 0);
        assert_eq!(pool.worker_count(), 0);

        pool.grow(1, 0);
        assert_eq!(pool.worker_count(), 1);
        // 1 * 2 < 3 spawns a second worker, 2 * 2 >= 3 stops.
        pool.grow(3, 0);
        assert_eq!(pool.worker_count(), 2);
        pool.grow(100, 0);
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(status.worker_count(), 3);
        pool.shutdown();
        assert_eq!(status.worker_count(), 0);
    }

    #[test]
    fn test_minimum_is_kept() {
        let (mut pool, _mailbox, _status) = manager(settings(2, 4, 3));
        pool.grow(0, 0);
        assert_eq!(pool.worker_count(), 2);
        assert!(!pool.above_minimum());
        pool.shutdown();
    }

    #[test]
    fn test_assign_retire_and_idle_tracking() {
        let (mut pool, mailbox, status) = manager(settings(0, 1, 1));
        pool.grow(1, 0);
        let worker = match mailbox.next_until(None).unwrap() {
            Some(Message::WorkerIdle { worker }) => worker,
            other => panic!("unexpected message {:?}", other),
        };
        assert!(!pool.has_idle());
        pool.mark_idle(worker);
        pool.mark_idle(worker);
        assert!(pool.has_idle());
        assert!(pool.is_idle(worker));

        pool.retire_idle();
        assert_eq!(pool.worker_count(), 0);
        assert_eq!(status.worker_count(), 0);
        assert!(!pool.has_idle());
        pool.shutdown();
    }

    #[test]
    fn test_idle_report_after_retiring_a_starting_worker() {
        let (mut pool, mailbox, status) = manager(settings(0, 1, 1));
        pool.grow(1, 0);
        assert_eq!(pool.worker_count(), 1);

        // Retired before its first idle report was handled.
        pool.retire_idle();
        assert_eq!(status.worker_count(), 0);

        let worker = match mailbox.next_until(None).unwrap() {
            Some(Message::WorkerIdle { worker }) => worker,
            other => panic!("unexpected message {:?}", other),
        };
        assert!(!pool.mark_idle(worker));
        assert!(!pool.has_idle());
        assert!(!pool.is_idle(worker));
        assert_eq!(pool.worker_count(), 0);

        assert!(!pool.mark_idle(worker + 100));
        pool.shutdown();
    }
}
