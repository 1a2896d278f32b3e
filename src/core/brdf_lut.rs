//! Split-sum BRDF integration lookup.
//!
//! The table is indexed by `NdotV` along x and perceptual roughness along y,
//! both sampled at texel centers. Red holds the Fresnel scale, green the bias.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};
use wgpu::util::DeviceExt;

use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::envmap::{hammersley, importance_sample_ggx};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture};
use crate::error::RenderResult;
use crate::gpu::submit_and_wait;

pub const BRDF_LUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const BRDF_SAMPLE_COUNT: u32 = 1024;

/// Texels covered by one workgroup along each axis.
pub const LUT_TILE: u32 = 32;

/// A LUT side must cover whole workgroup tiles.
pub fn is_valid_lut_resolution(resolution: u32) -> bool {
    resolution > 0 && resolution % LUT_TILE == 0
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LutParams {
    resolution: u32,
    sample_count: u32,
    _pad: [u32; 2],
}

fn g_schlick(n_dot_x: f32, k: f32) -> f32 {
    n_dot_x / (n_dot_x * (1.0 - k) + k)
}

/// CPU reference of one LUT entry: `(scale, bias)`.
pub fn integrate_brdf(n_dot_v: f32, roughness: f32, samples: u32) -> Vec2 {
    let v = Vec3::new((1.0 - n_dot_v * n_dot_v).max(0.0).sqrt(), 0.0, n_dot_v);
    let k = roughness * roughness / 2.0;
    let mut a = 0.0;
    let mut b = 0.0;
    for i in 0..samples {
        let h = importance_sample_ggx(hammersley(i, samples), Vec3::Z, roughness);
        let l = (2.0 * v.dot(h) * h - v).normalize();
        let n_dot_l = l.z.max(0.0);
        let n_dot_h = h.z.max(0.0);
        let v_dot_h = v.dot(h).max(0.0);
        if n_dot_l > 0.0 {
            let g = g_schlick(n_dot_v, k) * g_schlick(n_dot_l, k);
            let g_vis = g * v_dot_h / (n_dot_h * n_dot_v).max(1e-6);
            let fc = (1.0 - v_dot_h).powi(5);
            a += (1.0 - fc) * g_vis;
            b += fc * g_vis;
        }
    }
    Vec2::new(a, b) / samples as f32
}

pub struct BrdfLutBaker {
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl BrdfLutBaker {
    pub fn new(registry: &mut PipelineRegistry) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "ibl.brdf.bgl",
            &[
                entries::storage_texture(0, BRDF_LUT_FORMAT, wgpu::TextureViewDimension::D2),
                entries::uniform(1),
            ],
        );
        let pipeline = registry.compute("brdf_lut", "cs_brdf_lut", &[&layout])?;
        Ok(Self { layout, pipeline })
    }

    /// Bake a `resolution`² table and wait for it.
    ///
    /// # Panics
    /// When `resolution` is not a non-zero multiple of 32.
    pub fn bake(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        tracker: &mut StateTracker,
        resolution: u32,
    ) -> TrackedTexture {
        assert!(
            is_valid_lut_resolution(resolution),
            "BRDF LUT resolution {resolution} must be a multiple of {LUT_TILE}"
        );
        let lut = TrackedTexture::new(
            device,
            TextureSpec::d2("ibl.brdf_lut", resolution, resolution, BRDF_LUT_FORMAT).with_usage(
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC,
            ),
        );
        let params = LutParams {
            resolution,
            sample_count: BRDF_SAMPLE_COUNT,
            _pad: [0; 2],
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ibl.brdf.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        tracker.set_state(&lut, 0..1, ResourceState::StorageWrite);
        tracker.flush("ibl.brdf.bake");

        let view = lut.mip_view(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ibl.brdf.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ibl.brdf.encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ibl.brdf.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            let groups = resolution / LUT_TILE;
            pass.dispatch_workgroups(groups, groups, 1);
        }
        submit_and_wait(device, queue, encoder);

        tracker.set_state(&lut, 0..1, ResourceState::ShaderRead);
        tracker.flush("ibl.brdf.done");
        log::debug!("baked {resolution}² BRDF LUT ({} groups)", resolution / LUT_TILE);
        lut
    }
}
