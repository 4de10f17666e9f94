//! GPU buffer management for double-buffered particle data.
//!
//! Creates wgpu storage buffers holding [`ParticleMotion`] payloads, each
//! paired with its own staging buffer so the consumer can read a partition
//! back without contending with another partition's readback.

use wgpu::util::DeviceExt;

use crate::particle::ParticleMotion;
use crate::DeviceError;

/// One GPU-resident particle buffer with its readback staging twin.
#[derive(Debug)]
pub struct GpuParticleBuffer {
    /// Storage buffer the transform reads or writes.
    pub storage: wgpu::Buffer,
    /// MAP_READ staging buffer for consumer readback.
    pub staging: wgpu::Buffer,
    /// Number of particles the buffer holds.
    pub len: u32,
    /// Debug label.
    pub label: String,
}

impl GpuParticleBuffer {
    /// Allocate a storage buffer initialized with `particles` plus its
    /// staging twin.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        particles: &[ParticleMotion],
    ) -> Result<Self, DeviceError> {
        if particles.is_empty() {
            return Err(DeviceError(format!(
                "particle buffer '{label}' must hold at least one particle"
            )));
        }

        let storage = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(particles),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
        });

        let byte_len = std::mem::size_of_val(particles) as u64;
        let staging_label = format!("{label}_staging");
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&staging_label),
            size: byte_len,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            storage,
            staging,
            len: particles.len() as u32,
            label: label.to_string(),
        })
    }

    /// Byte size of the particle payload.
    pub fn byte_len(&self) -> u64 {
        self.len as u64 * std::mem::size_of::<ParticleMotion>() as u64
    }
}

/// Copy a particle buffer into its staging twin and read it back.
///
/// Blocks on `device.poll(Maintain::Wait)` until the copy retires and the
/// map completes.
pub fn readback_particles(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &GpuParticleBuffer,
) -> Result<Vec<ParticleMotion>, DeviceError> {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback"),
    });
    encoder.copy_buffer_to_buffer(&buffer.storage, 0, &buffer.staging, 0, buffer.byte_len());
    queue.submit(std::iter::once(encoder.finish()));

    let slice = buffer.staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| DeviceError(format!("readback of '{}' lost its map callback", buffer.label)))?
        .map_err(|e| DeviceError(format!("readback of '{}' failed to map: {e}", buffer.label)))?;

    let data = slice.get_mapped_range();
    let particles: Vec<ParticleMotion> = bytemuck::cast_slice(&data).to_vec();
    drop(data);
    buffer.staging.unmap();
    Ok(particles)
}
