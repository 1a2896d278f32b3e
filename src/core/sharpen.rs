//! Post-resolve contrast-adaptive sharpen.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::config::SharpenConfig;
use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture};
use crate::error::{RenderError, RenderResult};
use crate::gpu::dispatch_groups;

pub const SHARPEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const GROUP_SIZE: u32 = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct SharpenParams {
    resolution: [u32; 2],
    amount: f32,
    _pad: f32,
}

pub struct SharpenPass {
    resolution: (u32, u32),
    amount: f32,
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
    target: TrackedTexture,
}

impl SharpenPass {
    pub fn new(
        registry: &mut PipelineRegistry,
        resolution: (u32, u32),
        config: &SharpenConfig,
    ) -> RenderResult<Self> {
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(RenderError::config("sharpen resolution must be non-zero"));
        }
        let layout = registry.bind_group_layout(
            "sharpen.bgl",
            &[
                entries::texture(
                    0,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                entries::storage_texture(1, SHARPEN_FORMAT, wgpu::TextureViewDimension::D2),
                entries::uniform(2),
            ],
        );
        let pipeline = registry.compute("sharpen", "cs_sharpen", &[&layout])?;
        let target = TrackedTexture::new(
            registry.device(),
            TextureSpec::d2("sharpen.target", resolution.0, resolution.1, SHARPEN_FORMAT)
                .with_usage(
                    wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                ),
        );
        Ok(Self {
            resolution,
            amount: config.amount.clamp(0.0, 1.0),
            layout,
            pipeline,
            target,
        })
    }

    pub fn target(&self) -> &TrackedTexture {
        &self.target
    }

    pub fn amount(&self) -> f32 {
        self.amount
    }

    /// Clamped to [0, 1].
    pub fn set_amount(&mut self, amount: f32) {
        self.amount = amount.clamp(0.0, 1.0);
    }

    pub fn execute(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        input: &TrackedTexture,
    ) {
        debug_assert_eq!((input.width(), input.height()), self.resolution);

        tracker.set_state(input, 0..1, ResourceState::ShaderRead);
        tracker.set_state(&self.target, 0..1, ResourceState::StorageWrite);
        tracker.flush("sharpen");
        tracker.require(input, 0, ResourceState::ShaderRead);

        let (width, height) = self.resolution;
        let params = SharpenParams {
            resolution: [width, height],
            amount: self.amount,
            _pad: 0.0,
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sharpen.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let input_view = input.mip_view(0);
        let target_view = self.target.mip_view(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sharpen.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
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

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("sharpen"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(
            dispatch_groups(width, GROUP_SIZE),
            dispatch_groups(height, GROUP_SIZE),
            1,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_size() {
        assert_eq!(std::mem::size_of::<SharpenParams>(), 16);
    }
}
