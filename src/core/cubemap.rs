// src/core/cubemap.rs
// Equirectangular HDR panorama to cubemap projection on the GPU
// Writes mip 0 of every face of an RGBA32F cube with a single compute dispatch
// RELEVANT FILES: src/shaders/equirect_to_cube.wgsl, src/core/envmap.rs, src/core/environment.rs

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::envmap::EquirectImage;
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture, CUBE_FACE_COUNT};
use crate::error::{RenderError, RenderResult};
use crate::gpu::dispatch_groups;

pub const CUBEMAP_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
const GROUP_SIZE: u32 = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct ConvertParams {
    resolution: [u32; 2],
    inv_resolution: [f32; 2],
    src_size: [u32; 2],
    _pad: [u32; 2],
}

/// Allocate an RGBA32F cube of `resolution`² with a full mip chain.
pub fn create_cubemap(device: &wgpu::Device, label: &str, resolution: u32) -> TrackedTexture {
    TrackedTexture::new(
        device,
        TextureSpec::cube(label, resolution, CUBEMAP_FORMAT)
            .with_full_mips()
            .with_usage(
                wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_SRC
                    | wgpu::TextureUsages::COPY_DST,
            ),
    )
}

/// Upload a validated panorama as a sampled RGBA32F texture.
pub fn upload_equirect(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    image: &EquirectImage,
) -> RenderResult<TrackedTexture> {
    let limit = device.limits().max_texture_dimension_2d;
    if image.width > limit || image.height > limit {
        return Err(RenderError::upload(format!(
            "HDR image {}x{} exceeds device texture limit {}",
            image.width, image.height, limit
        )));
    }
    let spec = TextureSpec::d2(
        format!("{label}.equirect"),
        image.width,
        image.height,
        CUBEMAP_FORMAT,
    )
    .with_usage(wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST);
    Ok(TrackedTexture::with_data(
        device,
        queue,
        spec,
        bytemuck::cast_slice(&image.rgba),
    ))
}

/// Projects an equirectangular panorama onto the faces of a cube.
pub struct CubemapConverter {
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
}

impl CubemapConverter {
    pub fn new(registry: &mut PipelineRegistry) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "ibl.equirect.bgl",
            &[
                // Source panorama
                entries::float_texture(0, wgpu::TextureViewDimension::D2),
                // Cube mip 0, all faces
                entries::storage_texture(1, CUBEMAP_FORMAT, wgpu::TextureViewDimension::D2Array),
                // ConvertParams
                entries::uniform(2),
            ],
        );
        let pipeline = registry.compute("equirect_to_cube", "cs_equirect_to_cube", &[&layout])?;
        Ok(Self { layout, pipeline })
    }

    /// Record the projection of `equirect` into mip 0 of `cubemap`.
    pub fn convert(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        equirect: &TrackedTexture,
        cubemap: &TrackedTexture,
    ) -> RenderResult<()> {
        if cubemap.layers() != CUBE_FACE_COUNT || cubemap.width() != cubemap.height() {
            return Err(RenderError::render(format!(
                "'{}' is not a square 6-layer cube",
                cubemap.label()
            )));
        }
        let resolution = cubemap.width();

        tracker.set_state(equirect, 0..1, ResourceState::ShaderRead);
        tracker.set_state(cubemap, 0..1, ResourceState::StorageWrite);
        tracker.flush("ibl.equirect.convert");

        let params = ConvertParams {
            resolution: [resolution, resolution],
            inv_resolution: [1.0 / resolution as f32, 1.0 / resolution as f32],
            src_size: [equirect.width(), equirect.height()],
            _pad: [0; 2],
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("ibl.equirect.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let src_view = equirect.mip_view(0);
        let dst_view = cubemap.mip_view_array(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("ibl.equirect.bind_group"),
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

        let groups = dispatch_groups(resolution, GROUP_SIZE);
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("ibl.equirect.pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups, groups, CUBE_FACE_COUNT);
        }
        log::debug!(
            "equirect {}x{} -> cube {}² ({}x{}x{} groups)",
            equirect.width(),
            equirect.height(),
            resolution,
            groups,
            groups,
            CUBE_FACE_COUNT
        );

        tracker.set_state(cubemap, 0..1, ResourceState::ShaderRead);
        tracker.flush("ibl.equirect.done");
        Ok(())
    }
}
