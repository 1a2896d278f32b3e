// src/core/readback.rs
// Blocking GPU -> CPU downloads of buffers and texture mips with row depadding
// Used by the SH readback, the bake cache and every GPU test
// RELEVANT FILES: src/core/irradiance.rs, src/core/ibl_cache.rs, src/gpu.rs

use futures_intrusive::channel::shared::oneshot_channel;
use half::f16;

use crate::core::resources::TrackedTexture;
use crate::error::{RenderError, RenderResult};
use crate::gpu::align_copy_bpr;

/// Bytes per texel of the formats this crate reads back.
pub fn bytes_per_texel(format: wgpu::TextureFormat) -> RenderResult<u32> {
    match format {
        wgpu::TextureFormat::Rgba32Float => Ok(16),
        wgpu::TextureFormat::Rgba16Float => Ok(8),
        wgpu::TextureFormat::Rg16Float | wgpu::TextureFormat::R32Float => Ok(4),
        wgpu::TextureFormat::Rgba8Unorm | wgpu::TextureFormat::Rgba8UnormSrgb => Ok(4),
        other => Err(RenderError::readback(format!(
            "readback of {other:?} is not supported"
        ))),
    }
}

/// Map `staging` for reading and block until the callback fires.
fn map_blocking(device: &wgpu::Device, staging: &wgpu::Buffer) -> RenderResult<()> {
    let slice = staging.slice(..);
    let (sender, receiver) = oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    pollster::block_on(receiver.receive())
        .ok_or_else(|| RenderError::readback("map_async callback channel dropped"))?
        .map_err(|e| RenderError::readback(format!("buffer map failed: {e}")))
}

/// Copy `size` bytes of `src` into host memory. `src` needs `COPY_SRC`.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    size: u64,
) -> RenderResult<Vec<u8>> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback.buffer.staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback.buffer.encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    queue.submit(Some(encoder.finish()));

    map_blocking(device, &staging)?;
    let bytes = staging.slice(..).get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

pub fn read_buffer_f32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    count: usize,
) -> RenderResult<Vec<f32>> {
    let bytes = read_buffer(device, queue, src, (count * 4) as u64)?;
    Ok(bytemuck::pod_collect_to_vec(&bytes))
}

/// Download every layer of `mip`, tightly packed and layer-major.
pub fn read_texture_mip(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &TrackedTexture,
    mip: u32,
) -> RenderResult<Vec<u8>> {
    if mip >= texture.mip_count() {
        return Err(RenderError::readback(format!(
            "'{}' has {} mips, requested mip {}",
            texture.label(),
            texture.mip_count(),
            mip
        )));
    }
    let bpp = bytes_per_texel(texture.format())?;
    let (width, height) = texture.mip_size(mip);
    let layers = texture.layers();
    let tight_bpr = (bpp * width) as usize;
    let padded_bpr = align_copy_bpr(bpp * width) as usize;
    let padded_layer = padded_bpr * height as usize;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(&format!("readback.{}.mip{mip}", texture.label())),
        size: (padded_layer * layers as usize) as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback.texture.encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture: texture.texture(),
            mip_level: mip,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bpr as u32),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: layers,
        },
    );
    queue.submit(Some(encoder.finish()));

    map_blocking(device, &staging)?;
    let data = staging.slice(..).get_mapped_range();
    let mut tight = Vec::with_capacity(tight_bpr * height as usize * layers as usize);
    for row in 0..(height * layers) as usize {
        let start = row * padded_bpr;
        tight.extend_from_slice(&data[start..start + tight_bpr]);
    }
    drop(data);
    staging.unmap();
    Ok(tight)
}

/// Download a mip of a float texture as `f32` components.
///
/// Half-float formats are widened; the component count per texel is kept.
pub fn read_texture_mip_f32(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &TrackedTexture,
    mip: u32,
) -> RenderResult<Vec<f32>> {
    let bytes = read_texture_mip(device, queue, texture, mip)?;
    match texture.format() {
        wgpu::TextureFormat::Rgba32Float | wgpu::TextureFormat::R32Float => {
            Ok(bytemuck::pod_collect_to_vec(&bytes))
        }
        wgpu::TextureFormat::Rgba16Float | wgpu::TextureFormat::Rg16Float => {
            let halves: Vec<f16> = bytemuck::pod_collect_to_vec(&bytes);
            Ok(halves.into_iter().map(f16::to_f32).collect())
        }
        other => Err(RenderError::readback(format!(
            "{other:?} is not a float format"
        ))),
    }
}
