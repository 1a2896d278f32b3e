//! Pipeline configuration, fixed at construction.
//!
//! Every field has a default so partial JSON documents are accepted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::core::brdf_lut::{is_valid_lut_resolution, LUT_TILE};
use crate::core::mipmap::calculate_mip_levels;
use crate::error::{RenderError, RenderResult};

/// Reduction applied when building each Hi-Z level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HiZReduction {
    /// Nearest depth wins (standard depth)
    #[default]
    Min,
    /// Farthest depth wins (reversed depth)
    Max,
}

impl FromStr for HiZReduction {
    type Err = RenderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(RenderError::config(format!("unknown Hi-Z reduction '{other}'"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    #[serde(default = "EnvironmentConfig::default_cubemap_resolution")]
    pub cubemap_resolution: u32,
    #[serde(default = "EnvironmentConfig::default_prefiltered_mips")]
    pub prefiltered_mips: u32,
    #[serde(default = "EnvironmentConfig::default_brdf_lut_resolution")]
    pub brdf_lut_resolution: u32,
    #[serde(default = "EnvironmentConfig::default_prefilter_samples")]
    pub prefilter_samples: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl EnvironmentConfig {
    pub fn validate(&self) -> RenderResult<()> {
        if self.cubemap_resolution == 0 {
            return Err(RenderError::config("cubemap_resolution must be non-zero"));
        }
        let max_mips = calculate_mip_levels(self.cubemap_resolution, self.cubemap_resolution);
        if self.prefiltered_mips == 0 || self.prefiltered_mips > max_mips {
            return Err(RenderError::config(format!(
                "prefiltered_mips {} must be in 1..={max_mips} for a {}² cubemap",
                self.prefiltered_mips, self.cubemap_resolution
            )));
        }
        if !is_valid_lut_resolution(self.brdf_lut_resolution) {
            return Err(RenderError::config(format!(
                "brdf_lut_resolution {} must be a non-zero multiple of {LUT_TILE}",
                self.brdf_lut_resolution
            )));
        }
        if self.prefilter_samples == 0 {
            return Err(RenderError::config("prefilter_samples must be non-zero"));
        }
        Ok(())
    }

    fn default_cubemap_resolution() -> u32 {
        512
    }
    fn default_prefiltered_mips() -> u32 {
        6
    }
    fn default_brdf_lut_resolution() -> u32 {
        512
    }
    fn default_prefilter_samples() -> u32 {
        512
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            cubemap_resolution: Self::default_cubemap_resolution(),
            prefiltered_mips: Self::default_prefiltered_mips(),
            brdf_lut_resolution: Self::default_brdf_lut_resolution(),
            prefilter_samples: Self::default_prefilter_samples(),
            cache_dir: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaaConfig {
    #[serde(default = "TaaConfig::default_jitter_scale")]
    pub jitter_scale: f32,
    /// Default history filter for `TaaPass::resolve_default`; `resolve` takes it per call
    #[serde(default = "TaaConfig::default_filter_history")]
    pub filter_history: bool,
    #[serde(default)]
    pub unjitter_uvs: bool,
    /// Blend weight of the current frame when history is trusted
    #[serde(default = "TaaConfig::default_current_weight")]
    pub current_weight: f32,
    /// Motion-vector disagreement, in pixels, at which history is dropped
    #[serde(default = "TaaConfig::default_velocity_tolerance_px")]
    pub velocity_tolerance_px: f32,
}

impl TaaConfig {
    fn default_jitter_scale() -> f32 {
        1.0
    }
    fn default_filter_history() -> bool {
        true
    }
    fn default_current_weight() -> f32 {
        0.1
    }
    fn default_velocity_tolerance_px() -> f32 {
        1.0
    }
}

impl Default for TaaConfig {
    fn default() -> Self {
        Self {
            jitter_scale: Self::default_jitter_scale(),
            filter_history: Self::default_filter_history(),
            unjitter_uvs: false,
            current_weight: Self::default_current_weight(),
            velocity_tolerance_px: Self::default_velocity_tolerance_px(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HiZConfig {
    #[serde(default)]
    pub reduction: HiZReduction,
    /// `None` builds the full chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mip_count: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharpenConfig {
    #[serde(default = "SharpenConfig::default_amount")]
    pub amount: f32,
}

impl SharpenConfig {
    fn default_amount() -> f32 {
        0.2
    }
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            amount: Self::default_amount(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub taa: TaaConfig,
    #[serde(default)]
    pub hiz: HiZConfig,
    #[serde(default)]
    pub sharpen: SharpenConfig,
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> RenderResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> RenderResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> RenderResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject settings no component can honour.
    pub fn validate(&self) -> RenderResult<()> {
        self.environment.validate()?;

        let taa = &self.taa;
        if !taa.jitter_scale.is_finite() || taa.jitter_scale < 0.0 {
            return Err(RenderError::config(format!(
                "jitter_scale {} must be finite and non-negative",
                taa.jitter_scale
            )));
        }
        if !(taa.current_weight > 0.0 && taa.current_weight <= 1.0) {
            return Err(RenderError::config(format!(
                "current_weight {} must be in (0, 1]",
                taa.current_weight
            )));
        }
        if !(taa.velocity_tolerance_px > 0.0) {
            return Err(RenderError::config("velocity_tolerance_px must be positive"));
        }

        if self.hiz.mip_count == Some(0) {
            return Err(RenderError::config("hiz.mip_count must be non-zero"));
        }
        if !(0.0..=1.0).contains(&self.sharpen.amount) {
            return Err(RenderError::config(format!(
                "sharpen amount {} must be in [0, 1]",
                self.sharpen.amount
            )));
        }
        Ok(())
    }
}
