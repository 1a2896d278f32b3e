//! Mip chain generation
//!
//! [`MipGenerator`] fills mips `1..N` of a (cube or 2D) RGBA32F texture on the
//! GPU, one compute pass per level. Each level averages the 2×2 block of the
//! level above it; extents are integer right shifts, so odd dimensions drop
//! their last row/column at every halving. Downstream sampling code relies on
//! these rounded-down sizes, so the truncation is intentional.
//!
//! The CPU functions in this module mirror the kernel exactly and serve as
//! the reference for tests and tooling.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::TrackedTexture;
use crate::error::{RenderError, RenderResult};
use crate::gpu::dispatch_groups;

const GROUP_SIZE: u32 = 8;

/// Number of mips in a full chain: `floor(log2(max(w, h))) + 1`.
pub fn calculate_mip_levels(width: u32, height: u32) -> u32 {
    let max_dim = width.max(height);
    if max_dim == 0 {
        return 0;
    }
    32 - max_dim.leading_zeros()
}

/// Extent of `mip`: `max(1, w >> mip) × max(1, h >> mip)`.
#[inline]
pub fn mip_extent(width: u32, height: u32, mip: u32) -> (u32, u32) {
    let shift = |v: u32| v.checked_shr(mip).unwrap_or(0).max(1);
    (shift(width), shift(height))
}

/// Represents a single mipmap level
#[derive(Debug, Clone, PartialEq)]
pub struct Level {
    pub width: u32,
    pub height: u32,
    /// RGBA32F pixel data (row-major, 4 components per pixel)
    pub data: Vec<f32>,
}

impl Level {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> Self {
        assert_eq!(data.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let idx = ((y * self.width + x) * 4) as usize;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

/// Halve `src` the same way the GPU kernel does.
pub fn downsample_level(src: &Level) -> Level {
    let (dst_w, dst_h) = mip_extent(src.width, src.height, 1);
    let mut data = Vec::with_capacity((dst_w * dst_h * 4) as usize);
    for y in 0..dst_h {
        for x in 0..dst_w {
            let x0 = (2 * x).min(src.width - 1);
            let y0 = (2 * y).min(src.height - 1);
            let x1 = (2 * x + 1).min(src.width - 1);
            let y1 = (2 * y + 1).min(src.height - 1);
            let taps = [src.texel(x0, y0), src.texel(x1, y0), src.texel(x0, y1), src.texel(x1, y1)];
            for c in 0..4 {
                data.push((taps[0][c] + taps[1][c] + taps[2][c] + taps[3][c]) * 0.25);
            }
        }
    }
    Level::new(dst_w, dst_h, data)
}

/// Build `mip_count` levels (0 = input) on the CPU.
pub fn build_mip_chain_rgba32f(
    data: &[f32],
    width: u32,
    height: u32,
    mip_count: u32,
) -> RenderResult<Vec<Level>> {
    if width == 0 || height == 0 {
        return Err(RenderError::upload("width and height must be > 0"));
    }
    let expected_len = (width * height * 4) as usize;
    if data.len() != expected_len {
        return Err(RenderError::upload(format!(
            "data length mismatch: expected {} ({}x{}x4), got {}",
            expected_len,
            width,
            height,
            data.len()
        )));
    }
    let max_mips = calculate_mip_levels(width, height);
    if mip_count == 0 || mip_count > max_mips {
        return Err(RenderError::config(format!(
            "mip count {mip_count} outside 1..={max_mips} for {width}x{height}"
        )));
    }

    let mut levels = vec![Level::new(width, height, data.to_vec())];
    for _ in 1..mip_count {
        let next = downsample_level(&levels[levels.len() - 1]);
        levels.push(next);
    }
    Ok(levels)
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct MipParams {
    src_size: [u32; 2],
    dst_size: [u32; 2],
}

/// GPU downsampler for RGBA32F images with any layer count.
pub struct MipGenerator {
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl MipGenerator {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    pub fn new(registry: &mut PipelineRegistry) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "mip.downsample.bgl",
            &[
                entries::float_texture(0, wgpu::TextureViewDimension::D2Array),
                entries::storage_texture(1, Self::FORMAT, wgpu::TextureViewDimension::D2Array),
                entries::uniform(2),
            ],
        );
        let pipeline = registry.compute("mip_downsample", "cs_downsample", &[&layout])?;
        Ok(Self { layout, pipeline })
    }

    /// Record downsampling of mips `1..mip_count` into `encoder`.
    ///
    /// Mip 0 must already be written. With a single mip nothing is recorded.
    pub fn generate(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        texture: &TrackedTexture,
    ) -> RenderResult<()> {
        if texture.format() != Self::FORMAT {
            return Err(RenderError::render(format!(
                "mip generation expects {:?}, '{}' is {:?}",
                Self::FORMAT,
                texture.label(),
                texture.format()
            )));
        }
        let mips = texture.mip_count();
        if mips == 1 {
            return Ok(());
        }

        for mip in 1..mips {
            let (src_w, src_h) = texture.mip_size(mip - 1);
            let (dst_w, dst_h) = texture.mip_size(mip);

            tracker.set_state(texture, mip - 1..mip, ResourceState::ShaderRead);
            tracker.set_state(texture, mip..mip + 1, ResourceState::StorageWrite);
            tracker.flush(&format!("mip.downsample.{}.mip{mip}", texture.label()));
            tracker.require(texture, mip - 1, ResourceState::ShaderRead);

            let params = MipParams {
                src_size: [src_w, src_h],
                dst_size: [dst_w, dst_h],
            };
            let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("mip.downsample.params.mip{mip}")),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let src_view = texture.mip_view_array(mip - 1);
            let dst_view = texture.mip_view_array(mip);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("mip.downsample.bg.mip{mip}")),
                layout: &self.layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&src_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::TextureView(&dst_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params_buf.as_entire_binding(),
                    },
                ],
            });

            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&format!("mip.downsample.pass.mip{mip}")),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                dispatch_groups(dst_w, GROUP_SIZE),
                dispatch_groups(dst_h, GROUP_SIZE),
                texture.layers(),
            );
        }

        // Leave the whole chain readable for the consumers that follow.
        tracker.set_state(texture, mips - 1..mips, ResourceState::ShaderRead);
        tracker.flush(&format!("mip.downsample.{}.done", texture.label()));
        log::debug!(
            "generated {} mips for '{}' ({} layers)",
            mips - 1,
            texture.label(),
            texture.layers()
        );
        Ok(())
    }
}
