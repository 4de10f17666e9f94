//! Consumer-side obligation surface.
//!
//! The render path owns its own execution queue. Reading a partition is a
//! queued operation on that queue, and the matching obligation signal is
//! enqueued *behind* the read -- so when a compute worker later honors the
//! obligation with a queue-side wait, the wait covers the read itself, not
//! merely the consumer's request for it. A consumer that is throttled or
//! paused simply stops calling [`release`](RenderHandle::release); workers
//! then never stall, which is the designed default.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use kernel::{ComputeDevice, ComputeQueue, ParticleMotion};

use crate::context::SimulationContext;
use crate::SimulationError;

/// Handle through which the render/consumer path reads partitions and
/// publishes read obligations.
pub struct RenderHandle<D: ComputeDevice> {
    context: Arc<SimulationContext<D>>,
    queue: ComputeQueue<D>,
}

impl<D: ComputeDevice> RenderHandle<D> {
    /// Attach a consumer to a simulation context, creating its render queue.
    ///
    /// The obligation slots are single-producer: attach at most one consumer
    /// per partition set.
    pub fn new(context: Arc<SimulationContext<D>>) -> Self {
        let queue = ComputeQueue::new(Arc::clone(&context.device), "render");
        Self { context, queue }
    }

    /// Number of partitions available to read.
    pub fn partition_count(&self) -> usize {
        self.context.partitions.len()
    }

    /// Snapshot the partition's currently readable buffer.
    ///
    /// The read executes on the render queue in submission order; this call
    /// blocks only the consumer's own thread, at its own pace.
    pub fn acquire(&self, partition: usize) -> Result<Vec<ParticleMotion>, SimulationError> {
        let slot = self
            .context
            .partitions
            .get(partition)
            .ok_or(SimulationError::InvalidPartition(partition))?;
        let receiver = self.queue.read_back(slot.pair.readable())?;
        receiver
            .recv()
            .map_err(|_| SimulationError::Queue(kernel::QueueError::Disconnected))?
            .map_err(SimulationError::Device)
    }

    /// Declare the read finished: advance the shared render-context fence
    /// behind the read and publish the target into the partition's
    /// obligation slot for the worker's next ConsumerSync.
    pub fn release(&self, partition: usize) -> Result<u64, SimulationError> {
        let slot = self
            .context
            .partitions
            .get(partition)
            .ok_or(SimulationError::InvalidPartition(partition))?;

        let value = self.context.render.allocate();
        self.queue.signal(self.context.render.fence(), value)?;
        slot.obligation.store(value, Ordering::Release);
        tracing::trace!("partition {partition}: published read obligation {value}");
        Ok(value)
    }
}
