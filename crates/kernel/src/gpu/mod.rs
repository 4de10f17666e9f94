//! GPU (Metal/Vulkan/DX12 via wgpu) implementation of the compute back-end.
//!
//! `GpuDevice` implements [`ComputeDevice`] with a single compute pipeline:
//! the n-body transform reading one storage buffer and writing the other.
//!
//! # Bind group layout
//! One bind group, three slots, mirroring the transform's fixed parameter
//! layout: binding 0 the uniform parameter block, binding 1 the read-only
//! source buffer, binding 2 the read-write destination buffer.
//!
//! Access transitions are accepted but encode nothing -- wgpu tracks
//! resource barriers internally -- so recorded batches keep the same shape
//! on every back-end. `flush` maps to `device.poll(Maintain::Wait)`, which
//! is what orders a fence raise after the queue's submitted work.

pub mod buffers;

use std::sync::Arc;

use wgpu::util::DeviceExt;

use buffers::{readback_particles, GpuParticleBuffer};
use crate::batch::BufferAccess;
use crate::particle::ParticleMotion;
use crate::{ComputeDevice, DeviceError, SimParams, WORKGROUP_SIZE};

/// Check whether a compute-capable GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// GPU-accelerated compute back-end using a wgpu compute shader.
pub struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    params: SimParams,
}

impl GpuDevice {
    /// Create a GPU device with the given transform parameters.
    ///
    /// Returns `Err(DeviceError)` if no suitable adapter is found, allowing
    /// callers to fall back to [`CpuDevice`](crate::cpu::CpuDevice).
    pub fn new(params: SimParams) -> Result<Self, DeviceError> {
        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| DeviceError("no suitable GPU adapter found".into()))?;

        tracing::info!("GPU adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("particle_compute_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))
        .map_err(|e| DeviceError(format!("failed to create device: {e}")))?;

        // --- Shader and pipeline ---
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("particles"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/particles.wgsl").into()),
        });

        let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("simulate_bgl"),
            entries: &[
                bgl_uniform(0),    // params
                bgl_storage_ro(1), // source particles
                bgl_storage_rw(2), // destination particles
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("simulate_pl"),
            bind_group_layouts: &[&bind_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("simulate"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: Some("simulate"),
            compilation_options: Default::default(),
            cache: None,
        });

        // The transform's single constant buffer, uploaded once.
        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim_params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            bind_layout,
            params_buffer,
            params,
        })
    }
}

impl ComputeDevice for GpuDevice {
    type Buffer = Arc<GpuParticleBuffer>;

    fn create_buffer(
        &self,
        label: &str,
        particles: &[ParticleMotion],
    ) -> Result<Self::Buffer, DeviceError> {
        Ok(Arc::new(GpuParticleBuffer::new(
            &self.device,
            label,
            particles,
        )?))
    }

    fn transition(&self, _buffer: &Self::Buffer, _access: BufferAccess) -> Result<(), DeviceError> {
        // wgpu tracks resource states internally; the op carries no encoding.
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
        if particle_count > read.len || particle_count > write.len {
            return Err(DeviceError(format!(
                "dispatch over {} particles exceeds buffer '{}' capacity {}",
                particle_count,
                write.label,
                write.len.min(read.len)
            )));
        }

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("simulate_bg"),
            layout: &self.bind_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: read.storage.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: write.storage.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("simulate_step"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("simulate"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(particle_count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn read_particles(&self, buffer: &Self::Buffer) -> Result<Vec<ParticleMotion>, DeviceError> {
        readback_particles(&self.device, &self.queue, buffer)
    }

    fn flush(&self) -> Result<(), DeviceError> {
        self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn params(&self) -> SimParams {
        self.params
    }
}

// ---- Bind group layout entry helpers ----

fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}
