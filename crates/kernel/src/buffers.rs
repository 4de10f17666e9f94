//! Double-buffered particle storage with alternating readable/writable roles.

use std::sync::atomic::{AtomicUsize, Ordering};

/// A pair of equally sized device buffers whose roles alternate every
/// completed simulation iteration.
///
/// At any instant exactly one buffer is *readable* (consumer-visible, the
/// producer must not write it) and the other is *writable* (producer-
/// exclusive, the consumer must not read it). The role index is mutated only
/// by the owning compute worker ([`swap_roles`](BufferPair::swap_roles) with
/// a Release store); the consumer observes it with an Acquire load, so a
/// swap published by the worker is seen together with the dispatch results
/// that preceded it.
#[derive(Debug)]
pub struct BufferPair<B> {
    buffers: [B; 2],
    readable: AtomicUsize,
}

impl<B> BufferPair<B> {
    /// Create a pair with `first` initially readable and `second` writable.
    pub fn new(first: B, second: B) -> Self {
        Self {
            buffers: [first, second],
            readable: AtomicUsize::new(0),
        }
    }

    /// Index (0 or 1) of the currently readable buffer.
    pub fn readable_index(&self) -> usize {
        self.readable.load(Ordering::Acquire)
    }

    /// The buffer currently tagged readable.
    pub fn readable(&self) -> &B {
        &self.buffers[self.readable_index()]
    }

    /// The buffer currently tagged writable.
    pub fn writable(&self) -> &B {
        &self.buffers[1 - self.readable_index()]
    }

    /// Flip the readable/writable roles.
    ///
    /// Single-writer: only the worker owning this partition may call this,
    /// exactly once per completed iteration.
    pub fn swap_roles(&self) {
        let current = self.readable.load(Ordering::Relaxed);
        debug_assert!(current < 2, "buffer role index out of range: {current}");
        self.readable.store(1 - current, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_roles() {
        let pair = BufferPair::new("a", "b");
        assert_eq!(pair.readable_index(), 0);
        assert_eq!(*pair.readable(), "a");
        assert_eq!(*pair.writable(), "b");
    }

    #[test]
    fn test_roles_alternate_every_swap() {
        let pair = BufferPair::new(10, 20);
        for k in 1..=5 {
            pair.swap_roles();
            assert_eq!(pair.readable_index(), k % 2);
        }
    }

    #[test]
    fn test_readable_and_writable_never_alias() {
        let pair = BufferPair::new(0, 1);
        for _ in 0..4 {
            assert_ne!(pair.readable(), pair.writable());
            pair.swap_roles();
        }
    }
}
