//! Persistence collaborator.
//!
//! Durable storage of jobs is owned by the embedding application. The
//! coordinator only tells the persister when a persistent job enters the
//! queue and when it leaves the engine for good. Persister calls happen on
//! the coordinator thread, so implementations must be quick.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use jobqueue_api::JobInfo;

pub trait JobPersister: Send + Sync + fmt::Debug {
    /// Records a job that was accepted into the queue.
    fn persist(&self, job: &JobInfo) -> anyhow::Result<()>;

    /// Forgets a job that finished, failed or was cancelled.
    fn remove(&self, id: &str) -> anyhow::Result<()>;
}

/// Persister keeping job descriptions in memory.
#[derive(Debug, Default)]
pub struct InMemoryPersister {
    jobs: Mutex<HashMap<String, JobInfo>>,
}

impl InMemoryPersister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<JobInfo> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl JobPersister for InMemoryPersister {
    fn persist(&self, job: &JobInfo) -> anyhow::Result<()> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn remove(&self, id: &str) -> anyhow::Result<()> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).remove(id);
        Ok(())
    }
}
