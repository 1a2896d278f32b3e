//! Temporal anti-aliasing resolve with jittered projection.
//!
//! The pass owns the shaded frame the renderer draws into, two resolve
//! targets, two motion-vector targets and two camera buffers, all held in
//! [`Temporal`] rings. `resolve` writes the current resolve target from the
//! current frame and the previous target (the history), then advances every
//! ring and the jitter sequence.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};
use wgpu::util::DeviceExt;

use crate::config::TaaConfig;
use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::camera::{unjitter_uv, CameraData};
use crate::core::jitter::{Jitter, JitterSequence};
use crate::core::pipelines::{entries, PipelineRegistry};
use crate::core::resources::{TextureSpec, TrackedTexture};
use crate::core::temporal::Temporal;
use crate::error::RenderResult;
use crate::gpu::dispatch_groups;

pub const TAA_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const MOTION_VECTOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg16Float;
const GROUP_SIZE: u32 = 8;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TaaParams {
    resolution: [u32; 2],
    inv_resolution: [f32; 2],
    history_valid: u32,
    filter_history: u32,
    current_weight: f32,
    velocity_tolerance: f32,
    _pad: [f32; 4],
}

pub struct TaaPass {
    resolution: (u32, u32),
    config: TaaConfig,
    layout: Arc<wgpu::BindGroupLayout>,
    pipeline: Arc<wgpu::ComputePipeline>,
    sampler: wgpu::Sampler,
    current_target: TrackedTexture,
    targets: Temporal<TrackedTexture, 2>,
    motion_vectors: Temporal<TrackedTexture, 2>,
    camera_buffers: Temporal<wgpu::Buffer, 2>,
    jitter: JitterSequence,
    history_valid: bool,
}

impl TaaPass {
    pub fn new(
        registry: &mut PipelineRegistry,
        resolution: (u32, u32),
        config: TaaConfig,
    ) -> RenderResult<Self> {
        let layout = registry.bind_group_layout(
            "taa.bgl",
            &[
                // Previous motion vectors
                entries::texture(
                    0,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                // Current motion vectors
                entries::texture(
                    1,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                // History resolve target
                entries::texture(
                    2,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                // Current shaded frame
                entries::texture(
                    3,
                    wgpu::TextureSampleType::Float { filterable: true },
                    wgpu::TextureViewDimension::D2,
                ),
                entries::storage_texture(4, TAA_COLOR_FORMAT, wgpu::TextureViewDimension::D2),
                entries::sampler(5, wgpu::SamplerBindingType::Filtering),
                entries::uniform(6),
            ],
        );
        let pipeline = registry.compute("taa_resolve", "cs_taa_resolve", &[&layout])?;
        let device = registry.device().clone();

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("taa.sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let (width, height) = resolution;
        let current_target = TrackedTexture::new(
            &device,
            TextureSpec::d2("taa.current", width, height, TAA_COLOR_FORMAT).with_usage(
                wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
            ),
        );
        let targets = Temporal::from_fn(|i| {
            TrackedTexture::new(
                &device,
                TextureSpec::d2(format!("taa.targets[{i}]"), width, height, TAA_COLOR_FORMAT)
                    .with_usage(
                        wgpu::TextureUsages::STORAGE_BINDING
                            | wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_SRC,
                    ),
            )
        });
        let motion_vectors = Temporal::from_fn(|i| {
            TrackedTexture::new(
                &device,
                TextureSpec::d2(format!("taa.motion[{i}]"), width, height, MOTION_VECTOR_FORMAT)
                    .with_usage(
                        wgpu::TextureUsages::RENDER_ATTACHMENT
                            | wgpu::TextureUsages::TEXTURE_BINDING
                            | wgpu::TextureUsages::COPY_DST,
                    ),
            )
        });
        let camera_buffers = Temporal::from_fn(|i| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("taa.camera[{i}]")),
                size: std::mem::size_of::<CameraData>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        log::debug!("TAA pass allocated at {width}x{height}");
        Ok(Self {
            resolution,
            jitter: JitterSequence::new(config.jitter_scale),
            config,
            layout,
            pipeline,
            sampler,
            current_target,
            targets,
            motion_vectors,
            camera_buffers,
            history_valid: false,
        })
    }

    pub fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    pub fn config(&self) -> &TaaConfig {
        &self.config
    }

    /// Shaded frame the renderer draws into before `resolve`.
    pub fn current_target(&self) -> &TrackedTexture {
        &self.current_target
    }

    /// Target the next `resolve` writes.
    pub fn resolve_target(&self) -> &TrackedTexture {
        self.targets.current()
    }

    /// Most recently resolved frame.
    pub fn history(&self) -> &TrackedTexture {
        self.targets.previous()
    }

    pub fn motion_vectors(&self) -> &TrackedTexture {
        self.motion_vectors.current()
    }

    pub fn previous_motion_vectors(&self) -> &TrackedTexture {
        self.motion_vectors.previous()
    }

    pub fn camera_buffer(&self) -> &wgpu::Buffer {
        self.camera_buffers.current()
    }

    pub fn previous_camera_buffer(&self) -> &wgpu::Buffer {
        self.camera_buffers.previous()
    }

    pub fn jitter(&self) -> Jitter {
        self.jitter.current(self.resolution)
    }

    pub fn jitter_index(&self) -> usize {
        self.jitter.index()
    }

    pub fn history_valid(&self) -> bool {
        self.history_valid
    }

    /// Next resolve outputs the current frame unblended.
    pub fn reset_history(&mut self) {
        self.history_valid = false;
    }

    /// Strip this frame's jitter from a material UV when `unjitter_uvs` is set.
    pub fn material_uv(&self, uv: Vec2) -> Vec2 {
        if self.config.unjitter_uvs {
            unjitter_uv(uv, &self.jitter())
        } else {
            uv
        }
    }

    /// Write this frame's jittered camera into the current camera buffer.
    pub fn update_camera(&self, queue: &wgpu::Queue, view: Mat4, proj: Mat4) -> CameraData {
        let data = CameraData::new(view, proj, self.jitter());
        queue.write_buffer(self.camera_buffers.current(), 0, bytemuck::bytes_of(&data));
        data
    }

    /// `resolve` using the configured `filter_history`.
    pub fn resolve_default(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
    ) {
        let filter_history = self.config.filter_history;
        self.resolve(device, encoder, tracker, filter_history);
    }

    /// Record the temporal resolve and advance the rings.
    pub fn resolve(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tracker: &mut StateTracker,
        filter_history: bool,
    ) {
        let (width, height) = self.resolution;
        let prev_mv = self.motion_vectors.previous();
        let cur_mv = self.motion_vectors.current();
        let history = self.targets.previous();
        let target = self.targets.current();

        tracker.set_state(prev_mv, 0..1, ResourceState::ShaderRead);
        tracker.set_state(cur_mv, 0..1, ResourceState::ShaderRead);
        tracker.set_state(history, 0..1, ResourceState::ShaderRead);
        tracker.set_state(&self.current_target, 0..1, ResourceState::ShaderRead);
        tracker.set_state(target, 0..1, ResourceState::StorageWrite);
        tracker.flush("taa.resolve");
        tracker.require(&self.current_target, 0, ResourceState::ShaderRead);

        let params = TaaParams {
            resolution: [width, height],
            inv_resolution: [1.0 / width as f32, 1.0 / height as f32],
            history_valid: self.history_valid as u32,
            filter_history: filter_history as u32,
            current_weight: self.config.current_weight,
            velocity_tolerance: self.config.velocity_tolerance_px.max(1e-3),
            _pad: [0.0; 4],
        };
        let params_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("taa.params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let prev_mv_view = prev_mv.mip_view(0);
        let cur_mv_view = cur_mv.mip_view(0);
        let history_view = history.mip_view(0);
        let current_view = self.current_target.mip_view(0);
        let target_view = target.mip_view(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("taa.bind_group"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&prev_mv_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&cur_mv_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&history_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&current_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&target_view),
                },
                wgpu::BindGroupEntry {
                    binding: 5,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 6,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("taa.resolve"),
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

        self.targets.proceed();
        self.motion_vectors.proceed();
        self.camera_buffers.proceed();
        self.jitter.advance();
        self.history_valid = true;
    }
}
