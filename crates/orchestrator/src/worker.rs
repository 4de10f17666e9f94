//! The per-partition compute worker.
//!
//! Each worker owns one partition's execution queue, fence, and batch
//! recorder and drives the iteration state machine:
//!
//! ```text
//! Dispatching -> SelfSync -> ConsumerSync -> RolesSwap -> Prepared -> ...
//! ```
//!
//! terminating in `Stopped` only when the shutdown flag is observed at the
//! top of the loop. The flag is sampled with a non-blocking read before,
//! never during, a hardware wait, so shutdown latency is bounded by one
//! iteration's in-flight waits. Iterations are steppable
//! ([`run_iteration`](ComputeWorker::run_iteration)) so tests can interleave
//! worker progress with consumer actions deterministically.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use kernel::{BatchRecorder, BufferAccess, ComputeDevice, ComputeQueue, Fence};

use crate::context::SimulationContext;
use crate::SimulationError;

/// Phases of the worker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Recording and submitting the iteration's command batch.
    Dispatching,
    /// Waiting for this partition's own fence: the dispatch must retire
    /// before role bookkeeping proceeds.
    SelfSync,
    /// Consuming the outstanding render obligation, if any.
    ConsumerSync,
    /// Flipping the buffer pair's readable/writable roles.
    RolesSwap,
    /// Recorder reset; ready for the next iteration.
    Prepared,
    /// Shutdown observed; the worker has returned.
    Stopped,
}

/// One partition's compute worker.
pub struct ComputeWorker<D: ComputeDevice> {
    context: Arc<SimulationContext<D>>,
    partition: usize,
    queue: ComputeQueue<D>,
    fence: Arc<Fence>,
    fence_value: u64,
    recorder: BatchRecorder<D::Buffer>,
    phase: WorkerPhase,
}

impl<D: ComputeDevice> ComputeWorker<D> {
    /// Create the worker for `partition`, spawning its queue.
    pub fn new(context: Arc<SimulationContext<D>>, partition: usize) -> Self {
        debug_assert!(
            partition < context.partitions.len(),
            "partition index {partition} out of range"
        );
        let queue = ComputeQueue::new(Arc::clone(&context.device), &format!("compute-{partition}"));
        Self {
            context,
            partition,
            queue,
            fence: Arc::new(Fence::new(0)),
            fence_value: 0,
            recorder: BatchRecorder::new(),
            phase: WorkerPhase::Prepared,
        }
    }

    /// The partition this worker owns.
    pub fn partition(&self) -> usize {
        self.partition
    }

    /// The phase the worker last reached.
    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }

    /// Completed iterations of this partition.
    pub fn iterations(&self) -> u64 {
        self.context.partitions[self.partition]
            .iterations
            .load(Ordering::Acquire)
    }

    /// Execute exactly one iteration of the state machine.
    pub fn run_iteration(&mut self) -> Result<(), SimulationError> {
        let slot = &self.context.partitions[self.partition];

        // --- Dispatching: record barrier / dispatch / barrier, submit ---
        self.phase = WorkerPhase::Dispatching;
        let read = slot.pair.readable().clone();
        let write = slot.pair.writable().clone();
        self.recorder
            .transition(write.clone(), BufferAccess::ShaderWrite);
        self.recorder
            .dispatch(read, write.clone(), self.context.particles_per_partition);
        self.recorder.transition(write, BufferAccess::ShaderRead);
        self.queue.submit(self.recorder.finish())?;

        // --- SelfSync: the dispatch must retire before role bookkeeping ---
        self.phase = WorkerPhase::SelfSync;
        self.fence_value += 1;
        self.queue.signal(&self.fence, self.fence_value)?;
        self.fence.wait_for(self.fence_value);

        // --- ConsumerSync: honor the outstanding read obligation, if any ---
        // A queue-side wait, never a CPU block: the *next* dispatch queues
        // behind the consumer instead of this thread stalling here. The
        // slot is cleared only when a wait was actually inserted
        // (consume-once; zero means no outstanding obligation).
        self.phase = WorkerPhase::ConsumerSync;
        let target = slot.obligation.load(Ordering::Acquire);
        if self.context.render.fence().completed() < target {
            self.queue.wait_gpu(self.context.render.fence(), target)?;
            slot.obligation.store(0, Ordering::Release);
            slot.consumer_waits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                "partition {}: queued consumer wait for obligation {}",
                self.partition,
                target
            );
        }

        // --- RolesSwap: the single point where ownership transfers ---
        self.phase = WorkerPhase::RolesSwap;
        slot.pair.swap_roles();
        slot.iterations.fetch_add(1, Ordering::Release);

        // --- Prepared: recorder ready for the next iteration ---
        self.recorder.reset();
        self.phase = WorkerPhase::Prepared;
        Ok(())
    }

    /// Run iterations until shutdown is observed (or the configured
    /// iteration cap is reached).
    ///
    /// A queue or device fault is fatal: the worker requests shutdown for
    /// its siblings (best effort) and surfaces the error to `join_all`.
    pub fn run(mut self) -> Result<(), SimulationError> {
        tracing::debug!("partition {} worker started", self.partition);

        loop {
            if self.context.shutdown.is_requested() {
                break;
            }
            if let Some(max) = self.context.max_iterations {
                if self.iterations() >= max {
                    tracing::info!(
                        "partition {} reached max_iterations = {}",
                        self.partition,
                        max
                    );
                    break;
                }
            }

            if let Err(err) = self.run_iteration() {
                tracing::error!("partition {} worker fault: {}", self.partition, err);
                self.context.stop_workers();
                self.phase = WorkerPhase::Stopped;
                return Err(err);
            }

            let done = self.iterations();
            if done % 100 == 0 {
                tracing::debug!("partition {}: {} iterations", self.partition, done);
            }
        }

        self.phase = WorkerPhase::Stopped;
        tracing::debug!(
            "partition {} worker stopped after {} iterations",
            self.partition,
            self.iterations()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use kernel::{CpuDevice, SimParams};
    use std::time::Duration;

    const PARTICLES: u32 = 32;

    fn test_context(partitions: usize) -> Arc<SimulationContext<CpuDevice>> {
        let config = SimulationConfig {
            partition_count: partitions,
            particles_per_partition: PARTICLES,
            ..SimulationConfig::default()
        };
        let device = Arc::new(CpuDevice::new(SimParams::for_count(
            PARTICLES,
            config.timestep,
            config.damping,
        )));
        Arc::new(SimulationContext::new(device, &config).unwrap())
    }

    #[test]
    fn test_role_index_is_iteration_count_mod_two() {
        let ctx = test_context(1);
        let mut worker = ComputeWorker::new(Arc::clone(&ctx), 0);

        for k in 1..=7u64 {
            worker.run_iteration().unwrap();
            assert_eq!(worker.iterations(), k);
            assert_eq!(
                ctx.partitions[0].pair.readable_index(),
                (k % 2) as usize,
                "role index diverged at iteration {k}"
            );
        }
    }

    #[test]
    fn test_iteration_ends_prepared() {
        let ctx = test_context(1);
        let mut worker = ComputeWorker::new(Arc::clone(&ctx), 0);
        assert_eq!(worker.phase(), WorkerPhase::Prepared);
        worker.run_iteration().unwrap();
        assert_eq!(worker.phase(), WorkerPhase::Prepared);
    }

    #[test]
    fn test_consumer_sync_waits_only_on_unsatisfied_obligations() {
        let ctx = test_context(1);
        let mut worker = ComputeWorker::new(Arc::clone(&ctx), 0);
        let slot = &ctx.partitions[0];

        // Obligation published every 2nd iteration with a lagging render
        // fence: a wait goes in on exactly those iterations.
        let mut expected_waits = 0u64;
        for k in 1..=6u64 {
            if k % 2 == 1 {
                let v = ctx.render.allocate();
                slot.obligation.store(v, Ordering::Release);

                worker.run_iteration().unwrap();
                expected_waits += 1;
                assert_eq!(slot.consumer_waits.load(Ordering::Relaxed), expected_waits);
                // Consume-once: the slot is cleared after the wait went in.
                assert_eq!(slot.obligation.load(Ordering::Acquire), 0);

                // Open the gate so the next iteration's dispatch can run.
                ctx.render.fence().signal(v);
            } else {
                worker.run_iteration().unwrap();
                assert_eq!(
                    slot.consumer_waits.load(Ordering::Relaxed),
                    expected_waits,
                    "iteration {k} inserted a wait with no outstanding obligation"
                );
            }
        }
    }

    #[test]
    fn test_satisfied_obligation_is_a_noop() {
        let ctx = test_context(1);
        let mut worker = ComputeWorker::new(Arc::clone(&ctx), 0);
        let slot = &ctx.partitions[0];

        // Fence already past the published target: the fast path skips the
        // queue wait and leaves the slot untouched.
        let v = ctx.render.allocate();
        ctx.render.fence().signal(v);
        slot.obligation.store(v, Ordering::Release);

        worker.run_iteration().unwrap();
        assert_eq!(slot.consumer_waits.load(Ordering::Relaxed), 0);
        assert_eq!(slot.obligation.load(Ordering::Acquire), v);
    }

    #[test]
    fn test_run_ahead_is_bounded_by_one_iteration() {
        let ctx = test_context(1);
        let worker = ComputeWorker::new(Arc::clone(&ctx), 0);
        let slot = &ctx.partitions[0];

        // Publish an obligation the consumer never satisfies.
        let v = ctx.render.allocate();
        slot.obligation.store(v, Ordering::Release);

        let handle = std::thread::spawn(move || worker.run());

        // Iteration 1 consumes the obligation and gates the queue; iteration
        // 2 submits behind the gate and its SelfSync never completes. The
        // worker must sit at exactly one completed iteration.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while slot.iterations.load(Ordering::Acquire) < 1 {
            assert!(std::time::Instant::now() < deadline, "worker made no progress");
            std::thread::sleep(Duration::from_millis(2));
        }
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(slot.iterations.load(Ordering::Acquire), 1);

        // Releasing the obligation unblocks the backlog.
        ctx.render.fence().signal(v);
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while slot.iterations.load(Ordering::Acquire) < 3 {
            assert!(std::time::Instant::now() < deadline, "worker stayed stuck");
            std::thread::sleep(Duration::from_millis(2));
        }

        ctx.stop_workers();
        handle.join().unwrap().unwrap();
    }
}
