//! Monotonic fence counters for cross-queue and cross-thread completion
//! tracking.
//!
//! A [`Fence`] pairs a monotonically increasing `u64` counter with an OS wait
//! primitive. Producers raise the counter once prior work has retired;
//! waiters either block until a target value is reached (`wait_for`) or poll
//! the current value without blocking (`completed`). The same fence type is
//! used for a queue's self-throttling and for the shared render-context
//! handoff between the consumer and all compute workers.

use std::sync::{Condvar, Mutex};

/// A monotonically increasing completion counter with blocking wait support.
///
/// The counter only ever moves forward. A value observed through
/// [`Fence::completed`] is therefore always at or below the true completion
/// state -- never ahead of it -- which is what makes the non-blocking
/// fast path in consumer synchronization sound.
#[derive(Debug)]
pub struct Fence {
    value: Mutex<u64>,
    raised: Condvar,
}

impl Fence {
    /// Create a fence with the given initial counter value.
    pub fn new(initial: u64) -> Self {
        Self {
            value: Mutex::new(initial),
            raised: Condvar::new(),
        }
    }

    /// Raise the counter to `value` and wake all waiters.
    ///
    /// The counter is monotonic: a signal at or below the current value is
    /// a no-op. That makes overlapping signalers safe -- a queued signal
    /// that retires after a teardown-time raise simply lands late and
    /// changes nothing.
    pub fn signal(&self, value: u64) {
        let mut current = self.value.lock().unwrap();
        if value > *current {
            *current = value;
            self.raised.notify_all();
        }
    }

    /// Block the calling thread until the counter reaches `value`.
    ///
    /// Returns immediately if the counter is already at or past the target.
    pub fn wait_for(&self, value: u64) {
        let mut current = self.value.lock().unwrap();
        while *current < value {
            current = self.raised.wait(current).unwrap();
        }
    }

    /// Read the current counter without blocking.
    pub fn completed(&self) -> u64 {
        *self.value.lock().unwrap()
    }
}

impl Default for Fence {
    fn default() -> Self {
        Self::new(0)
    }
}
