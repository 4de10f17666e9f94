//! Owned shared simulation state.
//!
//! `SimulationContext` is the single explicitly-owned object holding
//! everything the compute workers and the consumer share: the device, the
//! per-partition slots (buffer pair, obligation, counters), the shared
//! render-context fence, and the shutdown flag. It is created once by
//! [`start`](crate::start), passed to each worker behind an `Arc`, and
//! released after the last worker has been joined.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use kernel::{seed_particle_cloud, BufferPair, ComputeDevice, DeviceError, Fence};

use crate::config::SimulationConfig;
use crate::shutdown::ShutdownFlag;

/// Shared per-partition state.
///
/// The buffer pair's role index is mutated only by the partition's worker;
/// the obligation slot is written by the consumer and consumed (read, then
/// reset) by the worker -- a single-producer / single-consumer handoff that
/// needs no lock beyond the atomics themselves.
pub struct PartitionSlot<D: ComputeDevice> {
    /// The partition's double-buffered particle storage.
    pub pair: BufferPair<D::Buffer>,
    /// Outstanding render-context fence target; zero means no obligation.
    pub obligation: AtomicU64,
    /// Completed iterations, for stats and progress logging.
    pub iterations: AtomicU64,
    /// Queue-side consumer waits this partition has inserted.
    pub consumer_waits: AtomicU64,
}

/// The shared render-context fence and its value allocator.
#[derive(Debug)]
pub struct RenderSync {
    fence: Arc<Fence>,
    /// Next fence value to hand out; values start at 1 so a zero obligation
    /// always means "nothing outstanding".
    next_value: AtomicU64,
}

impl RenderSync {
    fn new() -> Self {
        Self {
            fence: Arc::new(Fence::new(0)),
            next_value: AtomicU64::new(1),
        }
    }

    /// The shared render-context fence.
    pub fn fence(&self) -> &Arc<Fence> {
        &self.fence
    }

    /// Allocate the next obligation value.
    pub fn allocate(&self) -> u64 {
        self.next_value.fetch_add(1, Ordering::AcqRel)
    }

    /// Highest obligation value allocated so far (zero if none).
    pub fn highest_allocated(&self) -> u64 {
        self.next_value.load(Ordering::Acquire) - 1
    }

    /// Raise the render fence over every allocated obligation.
    ///
    /// Teardown path: the consumer stops reading once shutdown is
    /// requested, so outstanding obligations are claimed complete in one
    /// final raise. This is what keeps queue-side waits from outliving the
    /// consumer and hanging `join_all`.
    pub fn release_pending(&self) {
        let top = self.highest_allocated();
        if top > self.fence.completed() {
            self.fence.signal(top);
        }
    }
}

/// Everything the workers and the consumer share, owned in one place.
pub struct SimulationContext<D: ComputeDevice> {
    /// The compute back-end.
    pub device: Arc<D>,
    /// One slot per partition, indexed by partition id.
    pub partitions: Vec<PartitionSlot<D>>,
    /// Shared render-context fence state.
    pub render: RenderSync,
    /// Process-wide shutdown flag.
    pub shutdown: ShutdownFlag,
    /// Particles each partition's dispatch processes.
    pub particles_per_partition: u32,
    /// Optional iteration cap per worker.
    pub max_iterations: Option<u64>,
}

impl<D: ComputeDevice> SimulationContext<D> {
    /// Seed every partition's buffer pair and assemble the shared state.
    ///
    /// Both buffers of a pair start with identical copies of the partition's
    /// cloud, so the first iteration reads a fully initialized generation
    /// regardless of role assignment.
    pub fn new(device: Arc<D>, config: &SimulationConfig) -> Result<Self, DeviceError> {
        let mut partitions = Vec::with_capacity(config.partition_count);
        for partition in 0..config.partition_count {
            let cloud = seed_particle_cloud(
                config.particles_per_partition as usize,
                config.particle_spread,
                partition as u64,
            );
            let first = device.create_buffer(&format!("particles_{partition}_0"), &cloud)?;
            let second = device.create_buffer(&format!("particles_{partition}_1"), &cloud)?;
            partitions.push(PartitionSlot {
                pair: BufferPair::new(first, second),
                obligation: AtomicU64::new(0),
                iterations: AtomicU64::new(0),
                consumer_waits: AtomicU64::new(0),
            });
        }

        Ok(Self {
            device,
            partitions,
            render: RenderSync::new(),
            shutdown: ShutdownFlag::new(),
            particles_per_partition: config.particles_per_partition,
            max_iterations: config.max_iterations,
        })
    }

    /// Best-effort stop for every worker: raise the shutdown flag and
    /// release outstanding consumer obligations so no queue-side wait can
    /// outlive the consumer.
    pub fn stop_workers(&self) -> bool {
        let first = self.shutdown.request();
        self.render.release_pending();
        first
    }
}
