//! Device/queue ownership and blocking one-shot submission.

use std::sync::Arc;

use crate::error::{RenderError, RenderResult};

/// Device and queue shared by every pass in the pipeline.
///
/// Constructed explicitly and handed to the components that need it; the
/// context lives as long as the renderer that created it.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub adapter_info: Option<wgpu::AdapterInfo>,
}

impl GpuContext {
    /// Request a high-performance adapter and a device with default limits.
    pub fn new() -> RenderResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> RenderResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::device("No suitable GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    label: Some("ibl-temporal-device"),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::device(format!("request_device failed: {e}")))?;

        let info = adapter.get_info();
        log::info!("Using adapter '{}' ({:?})", info.name, info.backend);

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info: Some(info),
        })
    }

    /// Wrap a device/queue pair created elsewhere.
    pub fn from_parts(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            adapter_info: None,
        }
    }

    /// Submit a single encoder and block until the GPU has finished it.
    pub fn submit_and_wait(&self, encoder: wgpu::CommandEncoder) {
        submit_and_wait(&self.device, &self.queue, encoder);
    }
}

/// Blocking one-shot submission used by every preprocessing step.
pub fn submit_and_wait(device: &wgpu::Device, queue: &wgpu::Queue, encoder: wgpu::CommandEncoder) {
    let index = queue.submit(Some(encoder.finish()));
    device.poll(wgpu::Maintain::WaitForSubmissionIndex(index));
}

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

/// Workgroup count covering `size` invocations with groups of `group`.
#[inline]
pub fn dispatch_groups(size: u32, group: u32) -> u32 {
    (size + group - 1) / group
}
