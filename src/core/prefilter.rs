// src/core/prefilter.rs
// Roughness-per-mip specular environment, GGX importance sampled on the GPU
// Mip 0 is a straight copy of the source; each later mip convolves the whole source chain
// RELEVANT FILES: src/shaders/specular_prefilter.wgsl, src/core/cubemap.rs, src/core/environment.rs

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::cubemap::CUBEMAP_FORMAT;
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture, CUBE_FACE_COUNT};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{dispatch_groups, submit_and_wait};

const GROUP_SIZE: u32 = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct PrefilterParams {
    resolution: u32,
    inv_resolution: f32,
    mip: u32,
    roughness: f32,
    sample_count: u32,
    src_resolution: u32,
    src_mips: u32,
    _pad: u32,
}

/// Roughness stored in `mip` of a `mip_count`-level prefiltered chain.
pub fn roughness_for_mip(mip: u32, mip_count: u32) -> f32 {
    if mip_count <= 1 {
        0.0
    } else {
        mip as f32 / (mip_count - 1) as f32
    }
}

/// Allocate the RGBA32F prefiltered cube.
pub fn create_prefiltered_cube(
    device: &wgpu::Device,
    label: &str,
    resolution: u32,
    mip_count: u32,
) -> TrackedTexture {
    TrackedTexture::new(
        device,
        TextureSpec::cube(label, resolution, CUBEMAP_FORMAT)
            .with_mips(mip_count)
            .with_usage(
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
            ),
    )
}

pub struct SpecularPrefilterer {
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl SpecularPrefilterer {
    pub fn new(registry: &mut PipelineRegistry) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "ibl.prefilter.bgl",
            &[
                // Source cube, every mip
                entries::float_texture(0, wgpu::TextureViewDimension::D2Array),
                // Target mip, all faces
                entries::storage_texture(1, CUBEMAP_FORMAT, wgpu::TextureViewDimension::D2Array),
                entries::uniform(2),
            ],
        );
        let pipeline = registry.compute("specular_prefilter", "cs_prefilter", &[&layout])?;
        Ok(Self { layout, pipeline })
    }

    /// Build a `mip_count`-level prefiltered cube from `source` and wait for it.
    pub fn prefilter(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        tracker: &mut StateTracker,
        source: &TrackedTexture,
        mip_count: u32,
        sample_count: u32,
    ) -> RenderResult<TrackedTexture> {
        if mip_count == 0 || mip_count > source.mip_count() {
            return Err(RenderError::config(format!(
                "prefiltered mip count {} must be in 1..={} for '{}'",
                mip_count,
                source.mip_count(),
                source.label()
            )));
        }
        let target = create_prefiltered_cube(
            device,
            &format!("{}.prefiltered", source.label()),
            source.width(),
            mip_count,
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ibl.prefilter.encoder"),
        });
        self.record(device, &mut encoder, tracker, source, &target, sample_count)?;
        submit_and_wait(device, queue, encoder);
        log::debug!(
            "prefiltered '{}' into {} mips ({} samples)",
            source.label(),
            mip_count,
            sample_count
        );
        Ok(target)
    }

    /// Record the copy of mip 0 and one compute pass per rougher mip.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        source: &TrackedTexture,
        target: &TrackedTexture,
        sample_count: u32,
    ) -> RenderResult<()> {
        if source.layers() != CUBE_FACE_COUNT || target.layers() != CUBE_FACE_COUNT {
            return Err(RenderError::render("prefiltering needs 6-layer cubes"));
        }
        if target.width() != source.width() {
            return Err(RenderError::render(format!(
                "prefilter target {}² does not match source {}²",
                target.width(),
                source.width()
            )));
        }
        let mip_count = target.mip_count();

        tracker.set_state(source, 0..1, ResourceState::CopySrc);
        tracker.set_state(target, 0..1, ResourceState::CopyDst);
        tracker.flush("ibl.prefilter.copy");
        encoder.copy_texture_to_texture(
            wgpu::ImageCopyTexture {
                texture: source.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyTexture {
                texture: target.texture(),
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: source.width(),
                height: source.height(),
                depth_or_array_layers: CUBE_FACE_COUNT,
            },
        );

        if mip_count > 1 {
            tracker.set_state_all(source, ResourceState::ShaderRead);
            tracker.flush("ibl.prefilter.source");
        }
        let source_view = source.array_view();

        for mip in 1..mip_count {
            let (size, _) = target.mip_size(mip);
            tracker.set_state(target, mip..mip + 1, ResourceState::StorageWrite);
            tracker.flush(&format!("ibl.prefilter.mip{mip}"));
            tracker.require(source, 0, ResourceState::ShaderRead);

            let params = PrefilterParams {
                resolution: size,
                inv_resolution: 1.0 / size as f32,
                mip,
                roughness: roughness_for_mip(mip, mip_count),
                sample_count: sample_count.max(1),
                src_resolution: source.width(),
                src_mips: source.mip_count(),
                _pad: 0,
            };
            let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("ibl.prefilter.params.mip{mip}")),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let target_view = target.mip_view_array(mip);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("ibl.prefilter.bg.mip{mip}")),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&target_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buf.as_entire_binding(),
                    },
                ],
            });

            let groups = dispatch_groups(size, GROUP_SIZE);
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("ibl.prefilter.pass.mip{mip}")),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, groups, CUBE_FACE_COUNT);
        }

        tracker.set_state_all(target, ResourceState::ShaderRead);
        tracker.set_state(source, 0..1, ResourceState::ShaderRead);
        tracker.flush("ibl.prefilter.done");
        Ok(())
    }
}
