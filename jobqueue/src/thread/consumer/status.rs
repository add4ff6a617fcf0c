use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use crate::thread::error::panic_message;

/// Callback fired when the live worker count drops to zero.
pub type NoConsumersListener = Arc<dyn Fn() + Send + Sync>;

/// Handle returned when registering a [`NoConsumersListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Shared view of the worker pool.
///
/// The count is written only by the coordinator thread; anyone may read it
/// or register listeners. Listeners run on the coordinator thread and must
/// return quickly.
#[derive(Default)]
pub struct ConsumerStatus {
    workers: AtomicUsize,
    listeners: Mutex<Vec<(ListenerId, NoConsumersListener)>>,
    next_listener: AtomicU64,
}

impl fmt::Debug for ConsumerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerStatus")
            .field("workers", &self.worker_count())
            .field("listeners", &self.lock_listeners().len())
            .finish()
    }
}

impl ConsumerStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of alive workers, idle or busy.
    pub fn worker_count(&self) -> usize {
        self.workers.load(Ordering::SeqCst)
    }

    pub fn add_no_consumers_listener(&self, listener: NoConsumersListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.lock_listeners().push((id, listener));
        id
    }

    /// Returns false when the listener was not registered.
    pub fn remove_no_consumers_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(registered, _)| *registered != id);
        listeners.len() != before
    }

    /// Publishes a new worker count, firing listeners on a transition to
    /// zero.
    pub(crate) fn set_worker_count(&self, count: usize) {
        let previous = self.workers.swap(count, Ordering::SeqCst);
        if previous > 0 && count == 0 {
            debug!("no active consumers left");
            self.fire_no_consumers();
        }
    }

    fn fire_no_consumers(&self) {
        let snapshot: Vec<_> = self.lock_listeners().clone();
        for (id, listener) in snapshot {
            // Skip listeners removed by one fired earlier in this round.
            if !self.is_registered(id) {
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| listener())) {
                error!(
                    reason = %panic_message(payload.as_ref()),
                    "no-consumers listener panicked"
                );
            }
        }
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.lock_listeners().iter().any(|(registered, _)| *registered == id)
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, NoConsumersListener)>> {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_once_per_transition_to_zero() {
        let status = ConsumerStatus::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        status.add_no_consumers_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        status.set_worker_count(0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        status.set_worker_count(2);
        status.set_worker_count(1);
        status.set_worker_count(0);
        status.set_worker_count(0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        status.set_worker_count(1);
        status.set_worker_count(0);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_removal_during_firing() {
        let status = Arc::new(ConsumerStatus::new());
        let fired = Arc::new(AtomicUsize::new(0));

        // The first listener removes the second before it gets a turn.
        let second_id = Arc::new(Mutex::new(None::<ListenerId>));
        let remover_status = Arc::clone(&status);
        let remover_target = Arc::clone(&second_id);
        status.add_no_consumers_listener(Arc::new(move || {
            if let Some(id) = *remover_target.lock().unwrap() {
                remover_status.remove_no_consumers_listener(id);
            }
        }));
        let counter = Arc::clone(&fired);
        let id = status.add_no_consumers_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        *second_id.lock().unwrap() = Some(id);

        status.set_worker_count(1);
        status.set_worker_count(0);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!status.remove_no_consumers_listener(id));
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let status = ConsumerStatus::new();
        let fired = Arc::new(AtomicUsize::new(0));
        status.add_no_consumers_listener(Arc::new(|| panic!("listener bug")));
        let counter = Arc::clone(&fired);
        status.add_no_consumers_listener(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        status.set_worker_count(1);
        status.set_worker_count(0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
