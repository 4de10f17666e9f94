//! Orchestration Layer
//!
//! This crate provides the synchronization core of the particle simulation:
//! - Configuration parsing and validation
//! - The owned simulation context (buffers, fences, shutdown flag)
//! - One compute worker per partition, each driving its own queue
//! - The consumer-side render handle and its read-obligation contract
//! - The host surface: `start`, `request_shutdown`, `join_all`

#![warn(missing_docs)]

pub mod config;
pub mod consumer;
pub mod context;
pub mod shutdown;
pub mod worker;

pub use config::{BackendType, SimulationConfig};
pub use consumer::RenderHandle;
pub use context::SimulationContext;
pub use shutdown::ShutdownFlag;
pub use worker::{ComputeWorker, WorkerPhase};

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use kernel::{ComputeDevice, CpuDevice, DeviceError, QueueError, SimParams};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Error surfaced by the simulation host interface.
#[derive(Debug)]
pub enum SimulationError {
    /// Invalid configuration.
    Config(String),
    /// A compute back-end fault (driver-level; fatal, never retried).
    Device(DeviceError),
    /// An execution queue fault.
    Queue(QueueError),
    /// A worker thread panicked.
    WorkerPanicked {
        /// The partition whose worker panicked.
        partition: usize,
    },
    /// A partition index outside the started range.
    InvalidPartition(usize),
    /// A worker thread could not be spawned.
    Spawn(String),
}

impl std::fmt::Display for SimulationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimulationError::Config(reason) => write!(f, "invalid configuration: {reason}"),
            SimulationError::Device(err) => write!(f, "{err}"),
            SimulationError::Queue(err) => write!(f, "{err}"),
            SimulationError::WorkerPanicked { partition } => {
                write!(f, "partition {partition} worker panicked")
            }
            SimulationError::InvalidPartition(partition) => {
                write!(f, "partition index {partition} out of range")
            }
            SimulationError::Spawn(reason) => write!(f, "failed to spawn worker: {reason}"),
        }
    }
}

impl std::error::Error for SimulationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SimulationError::Device(err) => Some(err),
            SimulationError::Queue(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DeviceError> for SimulationError {
    fn from(err: DeviceError) -> Self {
        SimulationError::Device(err)
    }
}

impl From<QueueError> for SimulationError {
    fn from(err: QueueError) -> Self {
        SimulationError::Queue(err)
    }
}

// ---------------------------------------------------------------------------
// Simulation host surface
// ---------------------------------------------------------------------------

struct WorkerSlot {
    partition: usize,
    handle: JoinHandle<Result<(), SimulationError>>,
}

/// A running simulation: one compute worker thread per partition plus the
/// shared context.
pub struct Simulation<D: ComputeDevice> {
    context: Arc<SimulationContext<D>>,
    workers: Vec<WorkerSlot>,
}

/// Seed all partitions and spawn one compute worker thread per partition.
///
/// Returns once every worker has been spawned; the shutdown flag therefore
/// cannot be observed by a worker that was never started.
pub fn start<D: ComputeDevice>(
    device: Arc<D>,
    config: &SimulationConfig,
) -> Result<Simulation<D>, SimulationError> {
    config.validate().map_err(SimulationError::Config)?;

    tracing::info!(
        "starting '{}': {} partitions x {} particles",
        config.name,
        config.partition_count,
        config.particles_per_partition
    );

    let context = Arc::new(SimulationContext::new(device, config)?);

    let mut workers = Vec::with_capacity(config.partition_count);
    for partition in 0..config.partition_count {
        let worker = ComputeWorker::new(Arc::clone(&context), partition);
        let spawned = thread::Builder::new()
            .name(format!("compute-{partition}"))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => workers.push(WorkerSlot { partition, handle }),
            Err(e) => {
                // Tear down the workers that did start before reporting.
                context.stop_workers();
                for slot in workers {
                    let _ = slot.handle.join();
                }
                return Err(SimulationError::Spawn(format!(
                    "partition {partition}: {e}"
                )));
            }
        }
    }

    Ok(Simulation { context, workers })
}

impl<D: ComputeDevice> Simulation<D> {
    /// Request shutdown of every worker. Non-blocking and idempotent.
    pub fn request_shutdown(&self) {
        if self.context.stop_workers() {
            tracing::info!("shutdown requested");
        }
    }

    /// Block until every worker has reached `Stopped`.
    ///
    /// Returns the first worker fault, if any. Without a prior
    /// [`request_shutdown`](Simulation::request_shutdown) (or a configured
    /// `max_iterations`) this blocks for the simulation's lifetime.
    pub fn join_all(mut self) -> Result<(), SimulationError> {
        let mut first_fault = None;
        for slot in self.workers.drain(..) {
            match slot.handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_fault.get_or_insert(err);
                }
                Err(_) => {
                    first_fault.get_or_insert(SimulationError::WorkerPanicked {
                        partition: slot.partition,
                    });
                }
            }
        }

        tracing::info!("all workers joined");
        match first_fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Create a consumer-side handle with its own render queue.
    pub fn render_handle(&self) -> RenderHandle<D> {
        RenderHandle::new(Arc::clone(&self.context))
    }

    /// The shared simulation context (outlives `join_all` if cloned).
    pub fn context(&self) -> &Arc<SimulationContext<D>> {
        &self.context
    }

    /// Number of running partitions.
    pub fn partition_count(&self) -> usize {
        self.context.partitions.len()
    }

    /// Completed iterations of one partition.
    pub fn iterations(&self, partition: usize) -> u64 {
        self.context.partitions[partition]
            .iterations
            .load(std::sync::atomic::Ordering::Acquire)
    }

    /// Queue-side consumer waits one partition has inserted.
    pub fn consumer_waits(&self, partition: usize) -> u64 {
        self.context.partitions[partition]
            .consumer_waits
            .load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Current readable-role index of one partition's buffer pair.
    pub fn readable_index(&self, partition: usize) -> usize {
        self.context.partitions[partition].pair.readable_index()
    }
}

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// A running simulation over whichever back-end was selected.
pub enum AnySimulation {
    /// Running on the reference CPU back-end.
    Cpu(Simulation<CpuDevice>),
    /// Running on the wgpu back-end.
    #[cfg(feature = "gpu")]
    Gpu(Simulation<kernel::GpuDevice>),
}

impl AnySimulation {
    /// Request shutdown of every worker. Non-blocking and idempotent.
    pub fn request_shutdown(&self) {
        match self {
            AnySimulation::Cpu(sim) => sim.request_shutdown(),
            #[cfg(feature = "gpu")]
            AnySimulation::Gpu(sim) => sim.request_shutdown(),
        }
    }

    /// Block until every worker has reached `Stopped`.
    pub fn join_all(self) -> Result<(), SimulationError> {
        match self {
            AnySimulation::Cpu(sim) => sim.join_all(),
            #[cfg(feature = "gpu")]
            AnySimulation::Gpu(sim) => sim.join_all(),
        }
    }

    /// Number of running partitions.
    pub fn partition_count(&self) -> usize {
        match self {
            AnySimulation::Cpu(sim) => sim.partition_count(),
            #[cfg(feature = "gpu")]
            AnySimulation::Gpu(sim) => sim.partition_count(),
        }
    }

    /// Completed iterations of one partition.
    pub fn iterations(&self, partition: usize) -> u64 {
        match self {
            AnySimulation::Cpu(sim) => sim.iterations(partition),
            #[cfg(feature = "gpu")]
            AnySimulation::Gpu(sim) => sim.iterations(partition),
        }
    }
}

/// Start a simulation on the configured back-end.
///
/// For `Auto`, attempts GPU first and falls back to CPU if no adapter is
/// available or initialization fails.
pub fn create_simulation(config: &SimulationConfig) -> Result<AnySimulation, SimulationError> {
    config.validate().map_err(SimulationError::Config)?;
    let params = SimParams::for_count(
        config.particles_per_partition,
        config.timestep,
        config.damping,
    );

    match config.backend {
        BackendType::Cpu => {
            tracing::info!("creating CPU compute device");
            start(Arc::new(CpuDevice::new(params)), config).map(AnySimulation::Cpu)
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("creating GPU compute device");
            let device = kernel::GpuDevice::new(params)?;
            start(Arc::new(device), config).map(AnySimulation::Gpu)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(SimulationError::Config(
            "GPU backend requested but the 'gpu' feature is not enabled".to_string(),
        )),
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            if kernel::gpu::gpu_available() {
                match kernel::GpuDevice::new(params) {
                    Ok(device) => {
                        tracing::info!("GPU available, using GPU compute device");
                        return start(Arc::new(device), config).map(AnySimulation::Gpu);
                    }
                    Err(e) => {
                        tracing::warn!("GPU init failed ({e}), falling back to CPU");
                    }
                }
            } else {
                tracing::info!("no GPU available, using CPU compute device");
            }
            start(Arc::new(CpuDevice::new(params)), config).map(AnySimulation::Cpu)
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using CPU compute device");
            start(Arc::new(CpuDevice::new(params)), config).map(AnySimulation::Cpu)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_rejects_invalid_config() {
        let config = SimulationConfig {
            partition_count: 0,
            ..SimulationConfig::default()
        };
        let device = Arc::new(CpuDevice::new(SimParams::for_count(16, 0.1, 1.0)));
        assert!(matches!(
            start(device, &config),
            Err(SimulationError::Config(_))
        ));
    }

    #[test]
    fn test_cpu_simulation_runs_to_iteration_cap() {
        let config = SimulationConfig {
            partition_count: 2,
            particles_per_partition: 32,
            backend: BackendType::Cpu,
            max_iterations: Some(5),
            ..SimulationConfig::default()
        };

        let sim = create_simulation(&config).unwrap();
        assert_eq!(sim.partition_count(), 2);
        sim.join_all().unwrap();
    }

    #[test]
    fn test_shutdown_before_join() {
        let config = SimulationConfig {
            partition_count: 1,
            particles_per_partition: 32,
            backend: BackendType::Cpu,
            ..SimulationConfig::default()
        };

        let sim = create_simulation(&config).unwrap();
        sim.request_shutdown();
        sim.request_shutdown();
        sim.join_all().unwrap();
    }
}
