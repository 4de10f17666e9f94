//! Reference CPU back-end.
//!
//! `CpuDevice` runs the same n-body transform as the GPU shader, on host
//! memory. Beyond being the fallback when no adapter is available, it is the
//! back-end the protocol tests run on: every buffer carries reader/writer
//! occupancy counters, so a dispatch writing a buffer while the consumer is
//! still reading it (a torn read) is detected rather than silently racing.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::batch::BufferAccess;
use crate::particle::ParticleMotion;
use crate::{ComputeDevice, DeviceError, SimParams};

/// Gravitational softening; matches the constant in the WGSL shader.
const SOFTENING: f32 = 0.0012126;

const ACCESS_SHADER_READ: u8 = 0;
const ACCESS_SHADER_WRITE: u8 = 1;

/// One host-memory particle buffer with access-state tracking.
#[derive(Debug)]
pub struct HostBuffer {
    label: String,
    data: Mutex<Vec<ParticleMotion>>,
    /// Current shader access state, driven by recorded transitions.
    access: AtomicU8,
    /// Threads currently reading the buffer (dispatch source or consumer).
    readers: AtomicUsize,
    /// Dispatches currently writing the buffer.
    writers: AtomicUsize,
    /// Latched when a read and a write were ever observed overlapping.
    aliased: AtomicBool,
}

impl HostBuffer {
    fn new(label: &str, particles: &[ParticleMotion]) -> Self {
        Self {
            label: label.to_string(),
            data: Mutex::new(particles.to_vec()),
            access: AtomicU8::new(ACCESS_SHADER_READ),
            readers: AtomicUsize::new(0),
            writers: AtomicUsize::new(0),
            aliased: AtomicBool::new(false),
        }
    }

    /// Buffer label, as passed at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether a torn read (overlapping read and write) was ever observed
    /// on this buffer. Stays `false` for the lifetime of a correct run.
    pub fn aliasing_detected(&self) -> bool {
        self.aliased.load(Ordering::Acquire)
    }

    fn begin_read(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
        if self.writers.load(Ordering::Acquire) > 0 {
            self.aliased.store(true, Ordering::Release);
        }
    }

    fn end_read(&self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }

    fn begin_write(&self) {
        self.writers.fetch_add(1, Ordering::AcqRel);
        if self.readers.load(Ordering::Acquire) > 0 {
            self.aliased.store(true, Ordering::Release);
        }
    }

    fn end_write(&self) {
        self.writers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Reference CPU implementation of [`ComputeDevice`].
#[derive(Debug)]
pub struct CpuDevice {
    params: SimParams,
}

impl CpuDevice {
    /// Create a CPU device with the given transform parameters.
    pub fn new(params: SimParams) -> Self {
        Self { params }
    }

    /// Integrate `src` into `dst`: pairwise inverse-square attraction with
    /// softening, Euler integration, velocity damping.
    fn integrate(&self, src: &[ParticleMotion], dst: &mut [ParticleMotion], count: usize) {
        let dt = self.params.timestep;
        let damping = self.params.damping;
        let softening_sqr = SOFTENING * SOFTENING;

        for i in 0..count {
            let pos = src[i].position;
            let vel = src[i].velocity;
            let mut accel = [0.0f32; 3];

            for body in src.iter().take(count) {
                let r = [
                    body.position[0] - pos[0],
                    body.position[1] - pos[1],
                    body.position[2] - pos[2],
                ];
                let dist_sqr = r[0] * r[0] + r[1] * r[1] + r[2] * r[2] + softening_sqr;
                let inv_dist = 1.0 / dist_sqr.sqrt();
                let s = body.position[3] * inv_dist * inv_dist * inv_dist;
                accel[0] += r[0] * s;
                accel[1] += r[1] * s;
                accel[2] += r[2] * s;
            }

            let inv_mass = vel[3];
            let new_vel = [
                (vel[0] + accel[0] * dt * inv_mass) * damping,
                (vel[1] + accel[1] * dt * inv_mass) * damping,
                (vel[2] + accel[2] * dt * inv_mass) * damping,
            ];

            dst[i] = ParticleMotion {
                position: [
                    pos[0] + new_vel[0] * dt,
                    pos[1] + new_vel[1] * dt,
                    pos[2] + new_vel[2] * dt,
                    pos[3],
                ],
                velocity: [new_vel[0], new_vel[1], new_vel[2], vel[3]],
            };
        }
    }
}

impl ComputeDevice for CpuDevice {
    type Buffer = Arc<HostBuffer>;

    fn create_buffer(
        &self,
        label: &str,
        particles: &[ParticleMotion],
    ) -> Result<Self::Buffer, DeviceError> {
        Ok(Arc::new(HostBuffer::new(label, particles)))
    }

    fn transition(&self, buffer: &Self::Buffer, access: BufferAccess) -> Result<(), DeviceError> {
        let state = match access {
            BufferAccess::ShaderRead => ACCESS_SHADER_READ,
            BufferAccess::ShaderWrite => ACCESS_SHADER_WRITE,
        };
        buffer.access.store(state, Ordering::Release);
        Ok(())
    }

    fn dispatch(
        &self,
        read: &Self::Buffer,
        write: &Self::Buffer,
        particle_count: u32,
    ) -> Result<(), DeviceError> {
        debug_assert!(
            !Arc::ptr_eq(read, write),
            "dispatch read and write buffers alias"
        );
        debug_assert_eq!(
            write.access.load(Ordering::Acquire),
            ACCESS_SHADER_WRITE,
            "dispatch write target '{}' not transitioned to shader-write",
            write.label
        );

        read.begin_read();
        write.begin_write();

        let result = (|| {
            let src = read.data.lock().unwrap();
            let mut dst = write.data.lock().unwrap();
            let count = particle_count as usize;
            if count > src.len() || count > dst.len() {
                return Err(DeviceError(format!(
                    "dispatch over {} particles exceeds buffer '{}' capacity {}",
                    count,
                    write.label,
                    dst.len().min(src.len())
                )));
            }
            self.integrate(&src, &mut dst, count);
            Ok(())
        })();

        write.end_write();
        read.end_read();
        result
    }

    fn read_particles(&self, buffer: &Self::Buffer) -> Result<Vec<ParticleMotion>, DeviceError> {
        buffer.begin_read();
        let snapshot = buffer.data.lock().unwrap().clone();
        buffer.end_read();
        Ok(snapshot)
    }

    fn flush(&self) -> Result<(), DeviceError> {
        // Dispatches run synchronously on the queue executor; there is
        // nothing outstanding to retire.
        Ok(())
    }

    fn params(&self) -> SimParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::seed_particle_cloud;

    fn device() -> CpuDevice {
        CpuDevice::new(SimParams::for_count(64, 0.1, 1.0))
    }

    #[test]
    fn test_dispatch_moves_particles() {
        let dev = device();
        let cloud = seed_particle_cloud(64, 400.0, 0);
        let read = dev.create_buffer("src", &cloud).unwrap();
        let write = dev.create_buffer("dst", &cloud).unwrap();

        dev.transition(&write, BufferAccess::ShaderWrite).unwrap();
        dev.dispatch(&read, &write, 64).unwrap();
        dev.transition(&write, BufferAccess::ShaderRead).unwrap();

        let before = dev.read_particles(&read).unwrap();
        let after = dev.read_particles(&write).unwrap();
        // Seeded clusters carry +/-20 z velocity, so positions must change.
        assert_ne!(before, after);
        for (b, a) in before.iter().zip(after.iter()) {
            assert_eq!(b.position[3], a.position[3]);
        }
    }

    #[test]
    fn test_dispatch_is_deterministic() {
        let dev = device();
        let cloud = seed_particle_cloud(64, 400.0, 0);
        let read = dev.create_buffer("src", &cloud).unwrap();
        let w1 = dev.create_buffer("dst1", &cloud).unwrap();
        let w2 = dev.create_buffer("dst2", &cloud).unwrap();

        dev.transition(&w1, BufferAccess::ShaderWrite).unwrap();
        dev.transition(&w2, BufferAccess::ShaderWrite).unwrap();
        dev.dispatch(&read, &w1, 64).unwrap();
        dev.dispatch(&read, &w2, 64).unwrap();

        assert_eq!(
            dev.read_particles(&w1).unwrap(),
            dev.read_particles(&w2).unwrap()
        );
    }

    #[test]
    fn test_dispatch_beyond_capacity_faults() {
        let dev = device();
        let cloud = seed_particle_cloud(16, 400.0, 0);
        let read = dev.create_buffer("src", &cloud).unwrap();
        let write = dev.create_buffer("dst", &cloud).unwrap();
        dev.transition(&write, BufferAccess::ShaderWrite).unwrap();
        assert!(dev.dispatch(&read, &write, 32).is_err());
    }

    #[test]
    fn test_no_aliasing_in_clean_run() {
        let dev = device();
        let cloud = seed_particle_cloud(32, 400.0, 0);
        let read = dev.create_buffer("src", &cloud).unwrap();
        let write = dev.create_buffer("dst", &cloud).unwrap();

        dev.transition(&write, BufferAccess::ShaderWrite).unwrap();
        dev.dispatch(&read, &write, 32).unwrap();
        dev.read_particles(&read).unwrap();

        assert!(!read.aliasing_detected());
        assert!(!write.aliasing_detected());
    }

    #[test]
    fn test_damping_scales_velocity() {
        let still = vec![
            ParticleMotion {
                position: [0.0, 0.0, 0.0, 0.0],
                velocity: [10.0, 0.0, 0.0, 1.0],
            };
            1
        ];
        let dev = CpuDevice::new(SimParams::for_count(1, 0.1, 0.5));
        let read = dev.create_buffer("src", &still).unwrap();
        let write = dev.create_buffer("dst", &still).unwrap();
        dev.transition(&write, BufferAccess::ShaderWrite).unwrap();
        dev.dispatch(&read, &write, 1).unwrap();

        let after = dev.read_particles(&write).unwrap();
        // Zero mass means zero gravitational pull; only damping acts.
        assert!((after[0].velocity[0] - 5.0).abs() < 1e-6);
    }
}
