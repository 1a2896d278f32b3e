//! Shader module and compute pipeline registry.
//!
//! One registry per device. Components take `&mut PipelineRegistry` in their
//! constructors and keep the `Arc` handles they get back; modules compile
//! once per name and pipelines are shared per (module, entry point).

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{RenderError, RenderResult};

/// Embedded WGSL sources, keyed by the name components request them under.
const SHADER_SOURCES: &[(&str, &str)] = &[
    ("equirect_to_cube", include_str!("../shaders/equirect_to_cube.wgsl")),
    ("mip_downsample", include_str!("../shaders/mip_downsample.wgsl")),
    ("sh_project", include_str!("../shaders/sh_project.wgsl")),
    ("specular_prefilter", include_str!("../shaders/specular_prefilter.wgsl")),
    ("brdf_lut", include_str!("../shaders/brdf_lut.wgsl")),
    ("hiz", include_str!("../shaders/hiz.wgsl")),
    ("taa_resolve", include_str!("../shaders/taa_resolve.wgsl")),
    ("sharpen", include_str!("../shaders/sharpen.wgsl")),
];

/// Explicit replacement for a global program table.
pub struct PipelineRegistry {
    device: Arc<wgpu::Device>,
    modules: HashMap<&'static str, Arc<wgpu::ShaderModule>>,
    layouts: HashMap<String, Arc<wgpu::BindGroupLayout>>,
    pipelines: HashMap<(String, String), Arc<wgpu::ComputePipeline>>,
}

impl PipelineRegistry {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            modules: HashMap::new(),
            layouts: HashMap::new(),
            pipelines: HashMap::new(),
        }
    }

    pub fn device(&self) -> &Arc<wgpu::Device> {
        &self.device
    }

    /// Names of every shader the registry can build.
    pub fn shader_names() -> impl Iterator<Item = &'static str> {
        SHADER_SOURCES.iter().map(|(name, _)| *name)
    }

    /// Compiled module for `name`, compiling it on first use.
    pub fn module(&mut self, name: &str) -> RenderResult<Arc<wgpu::ShaderModule>> {
        let (key, source) = SHADER_SOURCES
            .iter()
            .find(|(n, _)| *n == name)
            .copied()
            .ok_or_else(|| RenderError::render(format!("Unknown shader program '{name}'")))?;

        if let Some(module) = self.modules.get(key) {
            return Ok(module.clone());
        }

        let module = Arc::new(self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&format!("shader.{key}")),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        }));
        log::debug!("compiled shader module '{key}'");
        self.modules.insert(key, module.clone());
        Ok(module)
    }

    /// Bind group layout registered under `key`, created from `entries` on first use.
    ///
    /// Pipelines cached by this registry are only compatible with bind
    /// groups built from the layout handed out here.
    pub fn bind_group_layout(
        &mut self,
        key: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Arc<wgpu::BindGroupLayout> {
        if let Some(layout) = self.layouts.get(key) {
            return layout.clone();
        }
        let layout = Arc::new(
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(key),
                    entries,
                }),
        );
        self.layouts.insert(key.to_string(), layout.clone());
        layout
    }

    /// Compute pipeline for `entry_point` of shader `name` with explicit bind group layouts.
    ///
    /// The first caller's layouts win; later callers asking for the same
    /// (shader, entry point) must pass compatible layouts.
    pub fn compute(
        &mut self,
        name: &str,
        entry_point: &str,
        bind_group_layouts: &[&wgpu::BindGroupLayout],
    ) -> RenderResult<Arc<wgpu::ComputePipeline>> {
        let key = (name.to_string(), entry_point.to_string());
        if let Some(pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline.clone());
        }

        let module = self.module(name)?;
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(&format!("{name}.{entry_point}.layout")),
                bind_group_layouts,
                push_constant_ranges: &[],
            });
        let pipeline = Arc::new(self.device.create_compute_pipeline(
            &wgpu::ComputePipelineDescriptor {
                label: Some(&format!("{name}.{entry_point}.pipeline")),
                layout: Some(&layout),
                module: &module,
                entry_point,
            },
        ));
        self.pipelines.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }
}

/// Shorthand constructors for compute-stage bind group layout entries.
pub mod entries {
    use wgpu::{
        BindGroupLayoutEntry, BindingType, BufferBindingType, SamplerBindingType, ShaderStages,
        StorageTextureAccess, TextureFormat, TextureSampleType, TextureViewDimension,
    };

    pub fn uniform(binding: u32) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn storage_buffer(binding: u32, read_only: bool) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    pub fn texture(
        binding: u32,
        sample_type: TextureSampleType,
        view_dimension: TextureViewDimension,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Texture {
                sample_type,
                view_dimension,
                multisampled: false,
            },
            count: None,
        }
    }

    /// Unfilterable float texture, read with `textureLoad`.
    pub fn float_texture(binding: u32, view_dimension: TextureViewDimension) -> BindGroupLayoutEntry {
        texture(
            binding,
            TextureSampleType::Float { filterable: false },
            view_dimension,
        )
    }

    pub fn storage_texture(
        binding: u32,
        format: TextureFormat,
        view_dimension: TextureViewDimension,
    ) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::StorageTexture {
                access: StorageTextureAccess::WriteOnly,
                format,
                view_dimension,
            },
            count: None,
        }
    }

    pub fn sampler(binding: u32, kind: SamplerBindingType) -> BindGroupLayoutEntry {
        BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Sampler(kind),
            count: None,
        }
    }
}
