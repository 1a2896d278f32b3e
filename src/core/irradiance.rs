// src/core/irradiance.rs
// Diffuse irradiance as order-2 spherical harmonics, baked in one dispatch
// Produces 27 floats on the GPU, then blocks on a readback for the host copy
// RELEVANT FILES: src/shaders/sh_project.wgsl, src/core/sh.rs, src/core/readback.rs

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::readback::read_buffer_f32;
use crate::core::resources::{TrackedTexture, CUBE_FACE_COUNT};
use crate::core::sh::{ShCoefficients, SH_COEFFICIENT_COUNT};
use crate::error::{RenderError, RenderResult};
use crate::gpu::submit_and_wait;

/// Largest face size the projection integrates; bigger cubes use a coarser mip.
pub const SH_MAX_SOURCE_SIZE: u32 = 64;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ShParams {
    size: u32,
    _pad: [u32; 3],
}

/// Result of one bake: host coefficients plus the GPU-resident mirror.
pub struct IrradianceBake {
    pub coefficients: ShCoefficients,
    pub buffer: wgpu::Buffer,
    /// Cube mip the projection integrated
    pub source_mip: u32,
}

pub struct IrradianceBaker {
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl IrradianceBaker {
    pub fn new(registry: &mut PipelineRegistry) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "ibl.sh.bgl",
            &[
                entries::float_texture(0, wgpu::TextureViewDimension::D2Array),
                entries::storage_buffer(1, false),
                entries::uniform(2),
            ],
        );
        let pipeline = registry.compute("sh_project", "cs_sh_project", &[&layout])?;
        Ok(Self { layout, pipeline })
    }

    /// First mip whose face size is at most [`SH_MAX_SOURCE_SIZE`].
    pub fn source_mip(cubemap: &TrackedTexture) -> u32 {
        let last = cubemap.mip_count().saturating_sub(1);
        (0..=last)
            .find(|&mip| cubemap.mip_size(mip).0 <= SH_MAX_SOURCE_SIZE)
            .unwrap_or(last)
    }

    /// Project `cubemap` and wait for the coefficients.
    ///
    /// All faces of the chosen source mip must be written.
    pub fn bake(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        tracker: &mut StateTracker,
        cubemap: &TrackedTexture,
    ) -> RenderResult<IrradianceBake> {
        if cubemap.layers() != CUBE_FACE_COUNT {
            return Err(RenderError::render(format!(
                "'{}' is not a cubemap",
                cubemap.label()
            )));
        }
        let source_mip = Self::source_mip(cubemap);
        let (size, _) = cubemap.mip_size(source_mip);

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(&format!("{}.sh", cubemap.label())),
            size: (SH_COEFFICIENT_COUNT * std::mem::size_of::<f32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let params = ShParams { size, _pad: [0; 3] };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ibl.sh.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        tracker.set_state(cubemap, source_mip..source_mip + 1, ResourceState::ShaderRead);
        tracker.flush("ibl.sh.project");
        tracker.require(cubemap, source_mip, ResourceState::ShaderRead);

        let view = cubemap.mip_view_array(source_mip);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ibl.sh.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ibl.sh.encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ibl.sh.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(1, 1, 1);
        }
        submit_and_wait(device, queue, encoder);

        let values = read_buffer_f32(device, queue, &buffer, SH_COEFFICIENT_COUNT)?;
        let coefficients = ShCoefficients::from_slice(&values).ok_or_else(|| {
            RenderError::readback(format!("expected 27 SH floats, got {}", values.len()))
        })?;
        log::debug!(
            "SH bake of '{}' from mip {} ({}²): dc=({:.4}, {:.4}, {:.4})",
            cubemap.label(),
            source_mip,
            size,
            coefficients.0[0],
            coefficients.0[1],
            coefficients.0[2]
        );

        Ok(IrradianceBake {
            coefficients,
            buffer,
            source_mip,
        })
    }

    /// Upload previously baked coefficients as the GPU mirror buffer.
    pub fn upload(device: &wgpu::Device, label: &str, coefficients: &ShCoefficients) -> wgpu::Buffer {
        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{label}.sh")),
            contents: bytemuck::cast_slice(coefficients.as_slice()),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        })
    }
}
