//! Independent in-order execution queues.
//!
//! A [`ComputeQueue`] models one hardware-facing channel: ops submitted to it
//! execute in order on a dedicated executor thread, independently of every
//! other queue. Three op kinds exist -- run a recorded batch, raise a fence
//! once prior work retires, and a queue-side wait that holds *subsequent*
//! work until another queue's fence reaches a target value. All submission
//! calls return immediately; only the executor thread ever blocks on a
//! queue-side wait, which is what lets a compute worker express "my next
//! dispatch must queue behind the consumer" without stalling its own thread.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::batch::{BatchOp, CommandBatch};
use crate::fence::Fence;
use crate::particle::ParticleMotion;
use crate::{ComputeDevice, DeviceError};

/// Receives the result of a queued [`ComputeQueue::read_back`].
pub type ReadBackReceiver = Receiver<Result<Vec<ParticleMotion>, DeviceError>>;

/// Error returned by queue submission calls.
#[derive(Debug, Clone)]
pub enum QueueError {
    /// The executor hit a device fault; the queue accepts no further work.
    Faulted(String),
    /// The executor thread is gone (the queue was torn down).
    Disconnected,
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueError::Faulted(reason) => write!(f, "queue faulted: {reason}"),
            QueueError::Disconnected => write!(f, "queue executor is gone"),
        }
    }
}

impl std::error::Error for QueueError {}

enum QueueCommand<D: ComputeDevice> {
    Run(CommandBatch<D::Buffer>),
    Signal(Arc<Fence>, u64),
    WaitFor(Arc<Fence>, u64),
    ReadBack(D::Buffer, Sender<Result<Vec<ParticleMotion>, DeviceError>>),
    Stop,
}

/// An independent in-order execution channel backed by one executor thread.
pub struct ComputeQueue<D: ComputeDevice> {
    label: String,
    sender: Sender<QueueCommand<D>>,
    executor: Option<JoinHandle<()>>,
    fault: Arc<Mutex<Option<DeviceError>>>,
}

impl<D: ComputeDevice> ComputeQueue<D> {
    /// Create a queue on `device` with a named executor thread.
    pub fn new(device: Arc<D>, label: &str) -> Self {
        let (sender, receiver) = mpsc::channel();
        let fault = Arc::new(Mutex::new(None));

        let executor_fault = Arc::clone(&fault);
        let executor_label = label.to_string();
        let executor = thread::Builder::new()
            .name(format!("queue-{label}"))
            .spawn(move || run_executor(device, receiver, executor_fault, executor_label))
            .expect("failed to spawn queue executor thread");

        Self {
            label: label.to_string(),
            sender,
            executor: Some(executor),
            fault,
        }
    }

    /// Queue label, as passed at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Enqueue a recorded batch for in-order execution.
    pub fn submit(&self, batch: CommandBatch<D::Buffer>) -> Result<(), QueueError> {
        self.send(QueueCommand::Run(batch))
    }

    /// Enqueue a fence raise that fires after all prior work on this queue
    /// has retired.
    pub fn signal(&self, fence: &Arc<Fence>, value: u64) -> Result<(), QueueError> {
        self.send(QueueCommand::Signal(Arc::clone(fence), value))
    }

    /// Enqueue a queue-side wait: work submitted after this call does not
    /// begin until `fence` reaches `value`. Never blocks the caller.
    pub fn wait_gpu(&self, fence: &Arc<Fence>, value: u64) -> Result<(), QueueError> {
        self.send(QueueCommand::WaitFor(Arc::clone(fence), value))
    }

    /// Enqueue a particle readback; the snapshot is taken in queue order
    /// (after all prior work on this queue) and delivered on the returned
    /// channel. Never blocks the caller.
    pub fn read_back(&self, buffer: &D::Buffer) -> Result<ReadBackReceiver, QueueError> {
        let (tx, rx) = mpsc::channel();
        self.send(QueueCommand::ReadBack(buffer.clone(), tx))?;
        Ok(rx)
    }

    fn send(&self, command: QueueCommand<D>) -> Result<(), QueueError> {
        if let Some(err) = self.fault.lock().unwrap().as_ref() {
            return Err(QueueError::Faulted(err.0.clone()));
        }
        self.sender.send(command).map_err(|_| {
            // The executor exits early only on a fault; report it if the
            // fault landed between our check and the send.
            match self.fault.lock().unwrap().as_ref() {
                Some(err) => QueueError::Faulted(err.0.clone()),
                None => QueueError::Disconnected,
            }
        })
    }
}

impl<D: ComputeDevice> Drop for ComputeQueue<D> {
    fn drop(&mut self) {
        // Executor drains everything already queued, then exits.
        let _ = self.sender.send(QueueCommand::Stop);
        if let Some(handle) = self.executor.take() {
            let _ = handle.join();
        }
    }
}

fn run_executor<D: ComputeDevice>(
    device: Arc<D>,
    receiver: Receiver<QueueCommand<D>>,
    fault: Arc<Mutex<Option<DeviceError>>>,
    label: String,
) {
    while let Ok(command) = receiver.recv() {
        let result = match command {
            QueueCommand::Run(batch) => execute_batch(&device, &batch),
            QueueCommand::Signal(fence, value) => device.flush().map(|()| fence.signal(value)),
            QueueCommand::WaitFor(fence, value) => {
                fence.wait_for(value);
                Ok(())
            }
            QueueCommand::ReadBack(buffer, reply) => {
                let result = device.read_particles(&buffer);
                let failure = result.as_ref().err().cloned();
                // The requester may have given up on the snapshot; that is
                // not a queue fault.
                let _ = reply.send(result);
                match failure {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
            QueueCommand::Stop => break,
        };

        if let Err(err) = result {
            tracing::error!("queue '{}' faulted: {}", label, err);
            *fault.lock().unwrap() = Some(err);
            break;
        }
    }
}

fn execute_batch<D: ComputeDevice>(
    device: &Arc<D>,
    batch: &CommandBatch<D::Buffer>,
) -> Result<(), DeviceError> {
    for op in batch.ops() {
        match op {
            BatchOp::Transition { buffer, access } => device.transition(buffer, *access)?,
            BatchOp::Dispatch {
                read,
                write,
                particle_count,
            } => device.dispatch(read, write, *particle_count)?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchRecorder;
    use crate::cpu::CpuDevice;
    use crate::particle::seed_particle_cloud;
    use crate::{BufferAccess, SimParams};
    use std::time::Duration;

    fn device() -> Arc<CpuDevice> {
        Arc::new(CpuDevice::new(SimParams::for_count(32, 0.1, 1.0)))
    }

    #[test]
    fn test_signal_fires_after_submitted_batch() {
        let dev = device();
        let cloud = seed_particle_cloud(32, 400.0, 0);
        let read = dev.create_buffer("read", &cloud).unwrap();
        let write = dev.create_buffer("write", &cloud).unwrap();

        let queue = ComputeQueue::new(Arc::clone(&dev), "test");
        let fence = Arc::new(Fence::new(0));

        let mut recorder = BatchRecorder::new();
        recorder.transition(write.clone(), BufferAccess::ShaderWrite);
        recorder.dispatch(read.clone(), write.clone(), 32);
        recorder.transition(write.clone(), BufferAccess::ShaderRead);

        queue.submit(recorder.finish()).unwrap();
        queue.signal(&fence, 1).unwrap();
        fence.wait_for(1);

        // The dispatch retired before the fence was raised.
        let after = dev.read_particles(&write).unwrap();
        assert_ne!(after, cloud);
    }

    #[test]
    fn test_queue_side_wait_holds_subsequent_work() {
        let dev = device();
        let cloud = seed_particle_cloud(32, 400.0, 0);
        let read = dev.create_buffer("read", &cloud).unwrap();
        let write = dev.create_buffer("write", &cloud).unwrap();

        let queue = ComputeQueue::new(Arc::clone(&dev), "gated");
        let gate = Arc::new(Fence::new(0));
        let done = Arc::new(Fence::new(0));

        queue.wait_gpu(&gate, 1).unwrap();
        let mut recorder = BatchRecorder::new();
        recorder.transition(write.clone(), BufferAccess::ShaderWrite);
        recorder.dispatch(read, write.clone(), 32);
        queue.submit(recorder.finish()).unwrap();
        queue.signal(&done, 1).unwrap();

        // Work behind the queue-side wait must not have run yet.
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(done.completed(), 0);
        assert_eq!(dev.read_particles(&write).unwrap(), cloud);

        gate.signal(1);
        done.wait_for(1);
        assert_ne!(dev.read_particles(&write).unwrap(), cloud);
    }

    #[test]
    fn test_faulted_queue_rejects_further_work() {
        let dev = device();
        let cloud = seed_particle_cloud(8, 400.0, 0);
        let read = dev.create_buffer("read", &cloud).unwrap();
        let write = dev.create_buffer("write", &cloud).unwrap();

        let queue = ComputeQueue::new(Arc::clone(&dev), "faulty");
        let fence = Arc::new(Fence::new(0));

        // Dispatch over more particles than the buffers hold: device fault.
        let mut recorder = BatchRecorder::new();
        recorder.transition(write.clone(), BufferAccess::ShaderWrite);
        recorder.dispatch(read, write, 64);
        queue.submit(recorder.finish()).unwrap();

        // The fault lands asynchronously; poll until submission fails.
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            match queue.signal(&fence, 1) {
                Err(QueueError::Faulted(_)) | Err(QueueError::Disconnected) => break,
                Ok(()) => {
                    assert!(
                        std::time::Instant::now() < deadline,
                        "queue never reported the device fault"
                    );
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    #[test]
    fn test_queues_execute_independently() {
        let dev = device();
        let cloud = seed_particle_cloud(32, 400.0, 0);

        let gate = Arc::new(Fence::new(0));
        let blocked = ComputeQueue::new(Arc::clone(&dev), "blocked");
        blocked.wait_gpu(&gate, 1).unwrap();

        // A second queue makes progress while the first sits in its wait.
        let free = ComputeQueue::new(Arc::clone(&dev), "free");
        let read = dev.create_buffer("read", &cloud).unwrap();
        let write = dev.create_buffer("write", &cloud).unwrap();
        let mut recorder = BatchRecorder::new();
        recorder.transition(write.clone(), BufferAccess::ShaderWrite);
        recorder.dispatch(read, write, 32);
        free.submit(recorder.finish()).unwrap();

        let done = Arc::new(Fence::new(0));
        free.signal(&done, 1).unwrap();
        done.wait_for(1);

        gate.signal(1);
    }
}
