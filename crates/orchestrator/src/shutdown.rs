//! Process-wide shutdown signaling.

use std::sync::atomic::{AtomicBool, Ordering};

/// One-directional shutdown flag polled by every compute worker.
///
/// The transition is monotonic: once requested, the flag is never reset for
/// the lifetime of the workers. Both sides are non-blocking -- workers
/// sample the flag at the top of each iteration, never inside a wait, so
/// shutdown latency is bounded by one iteration's in-flight waits rather
/// than being unbounded.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    requested: AtomicBool,
}

impl ShutdownFlag {
    /// Create a flag in the running (not requested) state.
    pub fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Request shutdown. Idempotent and non-blocking; returns `true` only
    /// on the first transition.
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    /// Non-blocking poll.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
