//! Time source used for job delays.
//!
//! The coordinator asks the clock for "now" whenever it decides whether a
//! delayed job is ready. The mailbox still waits in real time, so a manual
//! clock is only useful for readiness checks and counts.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
