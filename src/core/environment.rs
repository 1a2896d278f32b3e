//! Environment loading and IBL preprocessing.
//!
//! Each load runs the full bake synchronously: upload, cubemap projection,
//! mip generation, SH projection with readback, then specular prefiltering.
//! Environments are appended in load order and never removed; the index a
//! load returns stays valid for the manager's lifetime.

use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::core::barriers::{ResourceState, StateTracker};
use crate::core::brdf_lut::BrdfLutBaker;
use crate::core::cubemap::{create_cubemap, upload_equirect, CubemapConverter};
use crate::core::envmap::EquirectImage;
use crate::core::ibl_cache::{BakeKey, CacheMetadata, CachedBake, IblCache};
use crate::core::irradiance::IrradianceBaker;
use crate::core::mipmap::MipGenerator;
use crate::core::pipelines::PipelineRegistry;
use crate::core::prefilter::SpecularPrefilterer;
use crate::core::resources::TrackedTexture;
use crate::core::sh::ShCoefficients;
use crate::error::{RenderError, RenderResult};
use crate::formats::hdr::decode_hdr;
use crate::gpu::GpuContext;

/// One baked environment.
pub struct Environment {
    pub label: String,
    pub source_size: (u32, u32),
    /// RGBA32F cube with a full mip chain
    pub cubemap: TrackedTexture,
    /// Roughness `k / (mips - 1)` at mip `k`
    pub prefiltered: TrackedTexture,
    /// Cosine-convolved irradiance SH, band-major and channel-minor
    pub sh: ShCoefficients,
    /// GPU copy of `sh`
    pub sh_buffer: wgpu::Buffer,
    pub from_cache: bool,
}

impl Environment {
    pub fn sh_coefficients(&self) -> &[f32] {
        self.sh.as_slice()
    }

    pub fn irradiance(&self, normal: glam::Vec3) -> glam::Vec3 {
        self.sh.irradiance(normal)
    }
}

pub struct EnvironmentManager {
    ctx: GpuContext,
    config: EnvironmentConfig,
    tracker: StateTracker,
    converter: CubemapConverter,
    mip_generator: MipGenerator,
    irradiance: IrradianceBaker,
    prefilterer: SpecularPrefilterer,
    brdf_baker: BrdfLutBaker,
    cache: Option<IblCache>,
    environments: Vec<Environment>,
    env_brdf: Option<TrackedTexture>,
}

impl EnvironmentManager {
    pub fn new(
        ctx: GpuContext,
        registry: &mut PipelineRegistry,
        config: EnvironmentConfig,
    ) -> RenderResult<Self> {
        config.validate()?;

        let cache = match config.cache_dir.as_ref() {
            Some(dir) => match IblCache::new(dir) {
                Ok(cache) => Some(cache),
                Err(err) => {
                    warn!("IBL cache disabled, '{}' unusable: {err}", dir.display());
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            converter: CubemapConverter::new(registry)?,
            mip_generator: MipGenerator::new(registry)?,
            irradiance: IrradianceBaker::new(registry)?,
            prefilterer: SpecularPrefilterer::new(registry)?,
            brdf_baker: BrdfLutBaker::new(registry)?,
            ctx,
            config,
            tracker: StateTracker::new(),
            cache,
            environments: Vec::new(),
            env_brdf: None,
        })
    }

    /// Decode a Radiance HDR file and bake it. Returns the new index.
    pub fn load_environment<P: AsRef<Path>>(&mut self, path: P) -> RenderResult<usize> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            RenderError::io(format!("failed to read HDR '{}': {e}", path.display()))
        })?;
        let image = decode_hdr(&mut bytes.as_slice())?;
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "environment".to_string());
        let rgba = image.to_rgba();
        self.bake(&label, image.width, image.height, rgba, &bytes)
    }

    /// Bake an in-memory RGBA32F panorama. Returns the new index.
    pub fn load_environment_from_pixels(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: Vec<f32>,
    ) -> RenderResult<usize> {
        // Only hashed when a cache is configured
        let mut source = Vec::new();
        if self.cache.is_some() {
            source.reserve(8 + rgba.len() * 4);
            source.extend_from_slice(&width.to_le_bytes());
            source.extend_from_slice(&height.to_le_bytes());
            source.extend_from_slice(bytemuck::cast_slice(&rgba));
        }
        self.bake(label, width, height, rgba, &source)
    }

    fn bake_key(&self) -> BakeKey {
        BakeKey {
            cubemap_resolution: self.config.cubemap_resolution,
            prefiltered_mips: self.config.prefiltered_mips,
            sample_count: self.config.prefilter_samples,
        }
    }

    fn bake(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        rgba: Vec<f32>,
        cache_source: &[u8],
    ) -> RenderResult<usize> {
        let start = Instant::now();
        let device = self.ctx.device.clone();
        let queue = self.ctx.queue.clone();

        let image = EquirectImage::new(width, height, rgba)?;
        let equirect = upload_equirect(&device, &queue, label, &image)?;
        self.tracker.assume_state(&equirect, 0..1, ResourceState::CopyDst);
        let cubemap = create_cubemap(
            &device,
            &format!("{label}.cubemap"),
            self.config.cubemap_resolution,
        );

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("ibl.environment.cubemap"),
        });
        self.converter
            .convert(&device, &mut encoder, &mut self.tracker, &equirect, &cubemap)?;
        self.mip_generator
            .generate(&device, &mut encoder, &mut self.tracker, &cubemap)?;
        self.ctx.submit_and_wait(encoder);
        self.tracker.forget(equirect.id());
        drop(equirect);
        debug!("'{label}' cubemap ready after {:.2?}", start.elapsed());

        let key = self.bake_key();
        let hash = self
            .cache
            .as_ref()
            .map(|_| IblCache::key_for(cache_source, key));

        let cached = self.load_cached(label, hash.as_deref());
        let (sh, sh_buffer, prefiltered, from_cache) = match cached {
            Some((sh, prefiltered)) => {
                let buffer = IrradianceBaker::upload(&device, label, &sh);
                (sh, buffer, prefiltered, true)
            }
            None => {
                let irradiance = self
                    .irradiance
                    .bake(&device, &queue, &mut self.tracker, &cubemap)?;
                let prefiltered = self.prefilterer.prefilter(
                    &device,
                    &queue,
                    &mut self.tracker,
                    &cubemap,
                    self.config.prefiltered_mips,
                    self.config.prefilter_samples,
                )?;
                if let Some(hash) = hash {
                    self.store_cached(
                        label,
                        (width, height),
                        key,
                        hash,
                        &irradiance.coefficients,
                        &prefiltered,
                    );
                }
                (irradiance.coefficients, irradiance.buffer, prefiltered, false)
            }
        };

        let index = self.environments.len();
        self.environments.push(Environment {
            label: label.to_string(),
            source_size: (width, height),
            cubemap,
            prefiltered,
            sh,
            sh_buffer,
            from_cache,
        });
        info!(
            "Loaded environment '{label}' ({width}x{height}) as #{index} in {:.2?}{}",
            start.elapsed(),
            if from_cache { " (cached)" } else { "" }
        );
        Ok(index)
    }

    /// Cached SH and prefiltered cube for `hash`, if a usable entry exists.
    fn load_cached(
        &mut self,
        label: &str,
        hash: Option<&str>,
    ) -> Option<(ShCoefficients, TrackedTexture)> {
        let cache = self.cache.as_ref()?;
        let hash = hash?;
        let bake = match cache.load(hash) {
            Ok(Some(bake)) => bake,
            Ok(None) => return None,
            Err(err) => {
                warn!("Ignoring IBL cache entry for '{label}': {err}");
                return None;
            }
        };
        if bake.prefiltered.len() as u32 != self.config.prefiltered_mips
            || bake.metadata.cubemap_resolution != self.config.cubemap_resolution
        {
            warn!("IBL cache entry for '{label}' does not match the current settings");
            return None;
        }
        match bake.upload_prefiltered(&self.ctx.device, &self.ctx.queue, label) {
            Ok(prefiltered) => {
                self.tracker.assume_state(
                    &prefiltered,
                    0..prefiltered.mip_count(),
                    ResourceState::ShaderRead,
                );
                Some((bake.sh, prefiltered))
            }
            Err(err) => {
                warn!("Failed to restore cached IBL for '{label}': {err}");
                None
            }
        }
    }

    fn store_cached(
        &self,
        label: &str,
        source_size: (u32, u32),
        key: BakeKey,
        hash: String,
        sh: &ShCoefficients,
        prefiltered: &TrackedTexture,
    ) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let metadata = CacheMetadata::new(label, source_size, key, hash);
        let result = CachedBake::capture(
            &self.ctx.device,
            &self.ctx.queue,
            metadata,
            *sh,
            prefiltered,
        )
        .and_then(|bake| cache.store(&bake));
        if let Err(err) = result {
            warn!("Failed to write IBL cache: {err}");
        }
    }

    /// Bake the split-sum BRDF table. Later calls are no-ops.
    pub fn compute_env_brdf(&mut self) {
        if self.env_brdf.is_some() {
            return;
        }
        let start = Instant::now();
        let resolution = self.config.brdf_lut_resolution;
        let lut = self.brdf_baker.bake(
            &self.ctx.device,
            &self.ctx.queue,
            &mut self.tracker,
            resolution,
        );
        info!(
            "Baked {resolution}x{resolution} BRDF LUT in {:.2?}",
            start.elapsed()
        );
        self.env_brdf = Some(lut);
    }

    /// `None` until [`Self::compute_env_brdf`] has run.
    pub fn env_brdf(&self) -> Option<&TrackedTexture> {
        self.env_brdf.as_ref()
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn environment(&self, index: usize) -> Option<&Environment> {
        self.environments.get(index)
    }

    pub fn cubemap_resolution(&self) -> u32 {
        self.config.cubemap_resolution
    }

    pub fn prefiltered_mips(&self) -> u32 {
        self.config.prefiltered_mips
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&IblCache> {
        self.cache.as_ref()
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn tracker(&self) -> &StateTracker {
        &self.tracker
    }
}
