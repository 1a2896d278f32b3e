//! GPU image-based lighting precompute and temporal screen-space passes.
//!
//! The environment side turns an equirectangular HDR panorama into a mipped
//! cubemap, irradiance SH coefficients, a roughness-prefiltered specular cube
//! and a split-sum BRDF table. The per-frame side provides a Hi-Z depth
//! pyramid, a jittered TAA resolve with history reprojection, and a
//! post-resolve sharpen. Everything runs as wgpu compute passes.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod formats;
pub mod gpu;

pub use crate::config::{
    EnvironmentConfig, HiZConfig, HiZReduction, PipelineConfig, SharpenConfig, TaaConfig,
};
pub use crate::core::barriers::{ResourceState, StateTracker};
pub use crate::core::environment::{Environment, EnvironmentManager};
pub use crate::core::hiz::HiZPass;
pub use crate::core::jitter::{Jitter, JitterSequence};
pub use crate::core::pipelines::PipelineRegistry;
pub use crate::core::resources::{TextureSpec, TrackedTexture};
pub use crate::core::sharpen::SharpenPass;
pub use crate::core::taa::TaaPass;
pub use crate::core::temporal::Temporal;
pub use crate::error::{RenderError, RenderResult};
pub use crate::gpu::GpuContext;
