//! Hierarchical depth (Hi-Z) pyramid.
//!
//! Mip 0 is a copy of the depth buffer; every later mip stores the min (or
//! max, for reversed depth) of its footprint in the mip above. Odd source
//! extents fold the trailing row and column into the reduction, so each level
//! stays conservative with respect to the full-resolution depth.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::config::{HiZConfig, HiZReduction};
use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::mipmap::{calculate_mip_levels, mip_extent};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture};
use crate::error::{RenderError, RenderResult};
use crate::gpu::dispatch_groups;

pub const HIZ_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;
const GROUP_SIZE: u32 = 8;

/// Per-level dispatch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HiZMipParams {
    pub src_resolution: (u32, u32),
    pub dst_resolution: (u32, u32),
    pub mip0: bool,
    pub extra_src_column: bool,
    pub extra_src_row: bool,
}

impl HiZMipParams {
    pub fn new(resolution: (u32, u32), mip: u32) -> Self {
        let src_mip = mip.saturating_sub(1);
        let src_resolution = mip_extent(resolution.0, resolution.1, src_mip);
        let dst_resolution = mip_extent(resolution.0, resolution.1, mip);
        let odd = |v: u32| v & 1 != 0 && v != 1;
        // Mip 0 copies, so there is nothing extra to fold in
        let reduces = mip > 0;
        Self {
            src_resolution,
            dst_resolution,
            mip0: mip == 0,
            extra_src_column: reduces && odd(src_resolution.0),
            extra_src_row: reduces && odd(src_resolution.1),
        }
    }

    pub fn extra_src_column_and_row(&self) -> bool {
        self.extra_src_column && self.extra_src_row
    }

    fn to_gpu(self, reduction: HiZReduction) -> GpuHiZParams {
        GpuHiZParams {
            src_resolution: [self.src_resolution.0, self.src_resolution.1],
            dst_resolution: [self.dst_resolution.0, self.dst_resolution.1],
            inv_src_resolution: [
                1.0 / self.src_resolution.0 as f32,
                1.0 / self.src_resolution.1 as f32,
            ],
            mip0: self.mip0 as u32,
            extra_src_column: self.extra_src_column as u32,
            extra_src_row: self.extra_src_row as u32,
            extra_src_column_and_row: self.extra_src_column_and_row() as u32,
            reduce_max: (reduction == HiZReduction::Max) as u32,
            _pad: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuHiZParams {
    src_resolution: [u32; 2],
    dst_resolution: [u32; 2],
    inv_src_resolution: [f32; 2],
    mip0: u32,
    extra_src_column: u32,
    extra_src_row: u32,
    extra_src_column_and_row: u32,
    reduce_max: u32,
    _pad: u32,
}

/// Mip count for `resolution`, either the full chain or `requested`.
pub fn hiz_mip_count(resolution: (u32, u32), requested: Option<u32>) -> RenderResult<u32> {
    let full = calculate_mip_levels(resolution.0, resolution.1);
    match requested {
        None => Ok(full),
        Some(n) if n >= 1 && n <= full => Ok(n),
        Some(n) => Err(RenderError::config(format!(
            "Hi-Z mip count {n} outside 1..={full} for {}x{}",
            resolution.0, resolution.1
        ))),
    }
}

/// CPU mirror of the kernel over a row-major depth image.
pub fn build_pyramid_cpu(
    depth: &[f32],
    resolution: (u32, u32),
    mip_count: u32,
    reduction: HiZReduction,
) -> Vec<Vec<f32>> {
    let reduce = |a: f32, b: f32| match reduction {
        HiZReduction::Min => a.min(b),
        HiZReduction::Max => a.max(b),
    };
    let mut levels: Vec<Vec<f32>> = vec![depth.to_vec()];
    for mip in 1..mip_count {
        let params = HiZMipParams::new(resolution, mip);
        let (sw, sh) = params.src_resolution;
        let (dw, dh) = params.dst_resolution;
        let src = &levels[levels.len() - 1];
        let load = |x: u32, y: u32| src[(y.min(sh - 1) * sw + x.min(sw - 1)) as usize];

        let mut dst = Vec::with_capacity((dw * dh) as usize);
        for y in 0..dh {
            for x in 0..dw {
                let (bx, by) = (2 * x, 2 * y);
                let mut d = reduce(
                    reduce(load(bx, by), load(bx + 1, by)),
                    reduce(load(bx, by + 1), load(bx + 1, by + 1)),
                );
                if params.extra_src_column {
                    d = reduce(d, reduce(load(bx + 2, by), load(bx + 2, by + 1)));
                }
                if params.extra_src_row {
                    d = reduce(d, reduce(load(bx, by + 2), load(bx + 1, by + 2)));
                }
                if params.extra_src_column_and_row() {
                    d = reduce(d, load(bx + 2, by + 2));
                }
                dst.push(d);
            }
        }
        levels.push(dst);
    }
    levels
}

pub struct HiZPass {
    resolution: (u32, u32),
    mip_count: u32,
    reduction: HiZReduction,
    depth_layout: Arc<wgpu::BindGroupLayout>,
    depth_pipeline: Arc<wgpu::ComputePipeline>,
    float_layout: Arc<wgpu::BindGroupLayout>,
    float_pipeline: Arc<wgpu::ComputePipeline>,
    hiz: TrackedTexture,
}

impl HiZPass {
    pub fn new(
        registry: &mut PipelineRegistry,
        resolution: (u32, u32),
        config: &HiZConfig,
    ) -> RenderResult<Self> {
        if resolution.0 == 0 || resolution.1 == 0 {
            return Err(RenderError::config("Hi-Z resolution must be non-zero"));
        }
        let mip_count = hiz_mip_count(resolution, config.mip_count)?;

        let depth_layout = registry.bind_group_layout(
            "hiz.depth.bgl",
            &[
                entries::texture(
                    0,
                    wgpu::TextureSampleType::Depth,
                    wgpu::TextureViewDimension::D2,
                ),
                entries::storage_texture(1, HIZ_FORMAT, wgpu::TextureViewDimension::D2),
                entries::uniform(2),
            ],
        );
        let float_layout = registry.bind_group_layout(
            "hiz.float.bgl",
            &[
                entries::storage_texture(1, HIZ_FORMAT, wgpu::TextureViewDimension::D2),
                entries::uniform(2),
                entries::float_texture(3, wgpu::TextureViewDimension::D2),
            ],
        );
        let depth_pipeline = registry.compute("hiz", "cs_hiz_from_depth", &[&depth_layout])?;
        let float_pipeline = registry.compute("hiz", "cs_hiz_reduce", &[&float_layout])?;

        let hiz = TrackedTexture::new(
            registry.device(),
            TextureSpec::d2("hiz", resolution.0, resolution.1, HIZ_FORMAT)
                .with_mips(mip_count)
                .with_usage(
                    wgpu::TextureUsages::STORAGE_BINDING
                        | wgpu::TextureUsages::TEXTURE_BINDING
                        | wgpu::TextureUsages::COPY_SRC,
                ),
        );

        log::debug!(
            "Hi-Z pyramid {}x{} with {mip_count} mips ({:?})",
            resolution.0,
            resolution.1,
            config.reduction
        );
        Ok(Self {
            resolution,
            mip_count,
            reduction: config.reduction,
            depth_layout,
            depth_pipeline,
            float_layout,
            float_pipeline,
            hiz,
        })
    }

    pub fn hiz(&self) -> &TrackedTexture {
        &self.hiz
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    pub fn reduction(&self) -> HiZReduction {
        self.reduction
    }

    /// Record the full pyramid build from `depth` (Depth32Float or R32Float, mip 0 used).
    pub fn execute(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        depth: &TrackedTexture,
    ) {
        debug_assert_eq!(
            (depth.width(), depth.height()),
            self.resolution,
            "depth '{}' does not match the Hi-Z resolution",
            depth.label()
        );
        let from_depth = depth.format() == wgpu::TextureFormat::Depth32Float;
        debug_assert!(from_depth || depth.format() == HIZ_FORMAT);

        tracker.set_state(depth, 0..1, ResourceState::ShaderRead);
        tracker.set_state_all(&self.hiz, ResourceState::StorageWrite);
        tracker.flush("hiz.begin");

        for mip in 0..self.mip_count {
            let params = HiZMipParams::new(self.resolution, mip);
            let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("hiz.params.mip{mip}")),
                contents: bytemuck::bytes_of(&params.to_gpu(self.reduction)),
                usage: wgpu::BufferUsages::UNIFORM,
            });

            let (src, src_mip) = if mip == 0 { (depth, 0) } else { (&self.hiz, mip - 1) };
            tracker.require(src, src_mip, ResourceState::ShaderRead);
            tracker.require(&self.hiz, mip, ResourceState::StorageWrite);

            let src_view = src.mip_view(src_mip);
            let dst_view = self.hiz.mip_view(mip);
            let use_depth_entry = mip == 0 && from_depth;
            let (layout, pipeline, src_binding) = if use_depth_entry {
                (&self.depth_layout, &self.depth_pipeline, 0)
            } else {
                (&self.float_layout, &self.float_pipeline, 3)
            };
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("hiz.bind_group"),
                layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: src_binding,
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

            let (dw, dh) = params.dst_resolution;
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("hiz.mip"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(
                    dispatch_groups(dw, GROUP_SIZE),
                    dispatch_groups(dh, GROUP_SIZE),
                    1,
                );
            }
            log::trace!("hiz mip {mip}: {dw}x{dh}");

            // The next level samples this one
            tracker.set_state(&self.hiz, mip..mip + 1, ResourceState::ShaderRead);
            tracker.flush(&format!("hiz.mip{mip}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mip0_is_a_copy() {
        let p = HiZMipParams::new((7, 5), 0);
        assert!(p.mip0);
        assert_eq!(p.src_resolution, (7, 5));
        assert_eq!(p.dst_resolution, (7, 5));
        assert!(!p.extra_src_column && !p.extra_src_row);
    }

    #[test]
    fn test_odd_source_flags() {
        let p = HiZMipParams::new((7, 5), 1);
        assert_eq!(p.src_resolution, (7, 5));
        assert_eq!(p.dst_resolution, (3, 2));
        assert!(p.extra_src_column && p.extra_src_row && p.extra_src_column_and_row());

        let p = HiZMipParams::new((8, 5), 1);
        assert!(!p.extra_src_column && p.extra_src_row);
        assert!(!p.extra_src_column_and_row());
    }

    #[test]
    fn test_size_one_source_has_no_extra() {
        // 4x1: mip 2 reads a 2x1 source, mip 3 would read 1x1
        let p = HiZMipParams::new((4, 1), 2);
        assert_eq!(p.src_resolution, (2, 1));
        assert!(!p.extra_src_row);
        let p = HiZMipParams::new((3, 3), 2);
        assert_eq!(p.src_resolution, (1, 1));
        assert!(!p.extra_src_column && !p.extra_src_row);
    }

    #[test]
    fn test_mip_count() {
        assert_eq!(hiz_mip_count((1920, 1080), None).unwrap(), 11);
        assert_eq!(hiz_mip_count((1, 1), None).unwrap(), 1);
        assert_eq!(hiz_mip_count((64, 64), Some(3)).unwrap(), 3);
        assert!(hiz_mip_count((64, 64), Some(8)).is_err());
        assert!(hiz_mip_count((64, 64), Some(0)).is_err());
    }

    #[test]
    fn test_cpu_pyramid_is_conservative() {
        let (w, h) = (5u32, 3u32);
        let depth: Vec<f32> = (0..w * h).map(|i| 1.0 - i as f32 * 0.05).collect();
        let min_levels = build_pyramid_cpu(&depth, (w, h), 3, HiZReduction::Min);
        let max_levels = build_pyramid_cpu(&depth, (w, h), 3, HiZReduction::Max);
        let global_min = depth.iter().copied().fold(f32::MAX, f32::min);
        let global_max = depth.iter().copied().fold(f32::MIN, f32::max);

        assert_eq!(min_levels[1].len(), 2);
        // 2x1 -> 1x1 with the odd column folded in at mip 1
        assert_eq!(min_levels[2], vec![global_min]);
        assert_eq!(max_levels[2], vec![global_max]);
    }

    #[test]
    fn test_cpu_pyramid_constant() {
        let depth = vec![0.25f32; 6 * 4];
        for level in build_pyramid_cpu(&depth, (6, 4), 3, HiZReduction::Min) {
            assert!(level.iter().all(|&d| d == 0.25));
        }
    }

    #[test]
    fn test_gpu_params_layout() {
        assert_eq!(std::mem::size_of::<GpuHiZParams>(), 48);
        let gpu = HiZMipParams::new((9, 9), 1).to_gpu(HiZReduction::Max);
        assert_eq!(gpu.reduce_max, 1);
        assert_eq!(gpu.extra_src_column_and_row, 1);
    }
}
