//! Async-Compute Execution Kernel
//!
//! This crate provides the execution primitives for the particle simulation:
//! fences, in-order execution queues, recorded command batches, and
//! double-buffered particle storage, together with the compute back-ends
//! that actually run the simulation transform.
//!
//! # Modules
//! - [`fence`] -- monotonic fence counters with blocking wait support.
//! - [`queue`] -- per-queue executor threads with queue-side waits.
//! - [`batch`] -- recorded command batches (transitions + dispatches).
//! - [`buffers`] -- double-buffered particle storage with role swapping.
//! - [`particle`] -- the particle payload and deterministic cloud seeding.
//! - [`cpu`] -- reference CPU back-end with access-aliasing detection.
//! - [`gpu`] -- wgpu compute back-end (feature `gpu`).

#![warn(missing_docs)]

pub mod batch;
pub mod buffers;
pub mod cpu;
pub mod fence;
pub mod particle;
pub mod queue;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use batch::{BatchOp, BatchRecorder, BufferAccess, CommandBatch};
pub use buffers::BufferPair;
pub use cpu::CpuDevice;
pub use fence::Fence;
pub use particle::{seed_particle_cloud, ParticleMotion};
pub use queue::{ComputeQueue, QueueError, ReadBackReceiver};

#[cfg(feature = "gpu")]
pub use gpu::GpuDevice;

/// Workgroup size of the simulation transform; dispatch counts are derived
/// from it on both back-ends.
pub const WORKGROUP_SIZE: u32 = 128;

// ---------------------------------------------------------------------------
// Transform parameters
// ---------------------------------------------------------------------------

/// Fixed parameter block of the simulation transform.
///
/// Uploaded once at device construction (the transform's single constant
/// buffer); the layout must match the `SimParams` struct in the WGSL shader
/// exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SimParams {
    /// Number of particles each dispatch processes.
    pub particle_count: u32,
    /// Workgroups per dispatch: `ceil(particle_count / WORKGROUP_SIZE)`.
    pub dispatch_groups: u32,
    /// Integration timestep.
    pub timestep: f32,
    /// Velocity damping factor applied after integration.
    pub damping: f32,
}

impl SimParams {
    /// Derive the parameter block for a partition of `particle_count`
    /// particles.
    pub fn for_count(particle_count: u32, timestep: f32, damping: f32) -> Self {
        Self {
            particle_count,
            dispatch_groups: particle_count.div_ceil(WORKGROUP_SIZE),
            timestep,
            damping,
        }
    }
}

// ---------------------------------------------------------------------------
// Device errors
// ---------------------------------------------------------------------------

/// Error raised by a compute back-end.
///
/// Device errors are driver-level faults: the protocol treats them as fatal
/// and does not retry individual dispatches.
#[derive(Debug, Clone)]
pub struct DeviceError(pub String);

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "compute device fault: {}", self.0)
    }
}

impl std::error::Error for DeviceError {}

// ---------------------------------------------------------------------------
// ComputeDevice trait
// ---------------------------------------------------------------------------

/// Trait that all compute back-ends (CPU reference, wgpu) must implement.
///
/// A `ComputeDevice` owns the transform parameters and knows how to allocate
/// particle buffers, honor access transitions, run the simulation transform
/// from a read buffer into a write buffer, and read particles back for the
/// consumer. Buffers are cheap handles (`Arc`-backed) cloned into recorded
/// command batches.
///
/// Queue ordering, fences, and role management live *outside* the device:
/// back-ends only execute individual operations, which keeps the handoff
/// protocol identical across back-ends.
pub trait ComputeDevice: Send + Sync + 'static {
    /// Handle to one device-resident particle buffer.
    type Buffer: Clone + Send + Sync + 'static;

    /// Allocate a particle buffer initialized with `particles`.
    fn create_buffer(
        &self,
        label: &str,
        particles: &[ParticleMotion],
    ) -> Result<Self::Buffer, DeviceError>;

    /// Transition a buffer's shader access state.
    fn transition(&self, buffer: &Self::Buffer, access: BufferAccess) -> Result<(), DeviceError>;

    /// Run the simulation transform over `particle_count` particles, reading
    /// `read` and writing `write`. The buffers must never alias.
    fn dispatch(
        &self,
        read: &Self::Buffer,
        write: &Self::Buffer,
        particle_count: u32,
    ) -> Result<(), DeviceError>;

    /// Read a buffer's particle contents back to host memory.
    fn read_particles(&self, buffer: &Self::Buffer) -> Result<Vec<ParticleMotion>, DeviceError>;

    /// Block until all work previously handed to the device has retired.
    /// Called by queue executors before raising a fence.
    fn flush(&self) -> Result<(), DeviceError>;

    /// The transform parameters this device was constructed with.
    fn params(&self) -> SimParams;
}
