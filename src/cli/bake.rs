// src/cli/bake.rs
// `ibl-bake` argument parsing and the bake driver
// Loads one HDR through the EnvironmentManager and writes the optional artefacts
// RELEVANT FILES: src/bin/ibl_bake.rs, src/core/environment.rs, src/config.rs

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use half::f16;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::core::environment::EnvironmentManager;
use crate::core::pipelines::PipelineRegistry;
use crate::core::readback::read_texture_mip;
use crate::core::sh::{ShCoefficients, SH_BASIS_COUNT};
use crate::gpu::GpuContext;

pub const USAGE: &str = "usage: ibl-bake <input.hdr> [--config cfg.json] [--cubemap N] [--mips M] \
[--lut-png out.png] [--sh-json out.json] [--cache DIR]";

#[derive(Debug)]
pub struct BakeCliError {
    msg: String,
}

impl BakeCliError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl fmt::Display for BakeCliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.msg.fmt(f)
    }
}

impl std::error::Error for BakeCliError {}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BakeArgs {
    pub input: PathBuf,
    pub config: Option<PathBuf>,
    pub cubemap: Option<u32>,
    pub mips: Option<u32>,
    pub lut_png: Option<PathBuf>,
    pub sh_json: Option<PathBuf>,
    pub cache: Option<PathBuf>,
}

fn value<'a>(args: &'a [String], idx: usize, flag: &str) -> Result<&'a str, BakeCliError> {
    args.get(idx + 1)
        .map(String::as_str)
        .ok_or_else(|| BakeCliError::new(format!("missing value for {flag}")))
}

fn parse_u32(args: &[String], idx: usize, flag: &str) -> Result<u32, BakeCliError> {
    let raw = value(args, idx, flag)?;
    raw.parse::<u32>()
        .map_err(|_| BakeCliError::new(format!("invalid integer value '{raw}' for {flag}")))
}

impl BakeArgs {
    /// Parse everything after argv[0].
    pub fn parse(args: &[String]) -> Result<Self, BakeCliError> {
        let mut parsed = BakeArgs::default();
        let mut input = None;
        let mut i = 0;
        while i < args.len() {
            let arg = args[i].as_str();
            match arg {
                "--config" => {
                    parsed.config = Some(PathBuf::from(value(args, i, arg)?));
                    i += 1;
                }
                "--cubemap" => {
                    parsed.cubemap = Some(parse_u32(args, i, arg)?);
                    i += 1;
                }
                "--mips" => {
                    parsed.mips = Some(parse_u32(args, i, arg)?);
                    i += 1;
                }
                "--lut-png" => {
                    parsed.lut_png = Some(PathBuf::from(value(args, i, arg)?));
                    i += 1;
                }
                "--sh-json" => {
                    parsed.sh_json = Some(PathBuf::from(value(args, i, arg)?));
                    i += 1;
                }
                "--cache" => {
                    parsed.cache = Some(PathBuf::from(value(args, i, arg)?));
                    i += 1;
                }
                flag if flag.starts_with("--") => {
                    return Err(BakeCliError::new(format!("unknown flag '{flag}'")));
                }
                positional => {
                    if input.is_some() {
                        return Err(BakeCliError::new(format!(
                            "unexpected extra argument '{positional}'"
                        )));
                    }
                    input = Some(PathBuf::from(positional));
                }
            }
            i += 1;
        }
        parsed.input = input.ok_or_else(|| BakeCliError::new("missing input HDR path"))?;
        Ok(parsed)
    }

    /// Config file (or defaults) with the command-line overrides applied.
    pub fn resolve_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading config '{}'", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(n) = self.cubemap {
            config.environment.cubemap_resolution = n;
        }
        if let Some(m) = self.mips {
            config.environment.prefiltered_mips = m;
        }
        if let Some(dir) = &self.cache {
            config.environment.cache_dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct ShReport<'a> {
    source: &'a str,
    cubemap_resolution: u32,
    /// One RGB triple per basis function, band-major
    coefficients: Vec<[f32; 3]>,
}

fn sh_triples(sh: &ShCoefficients) -> Vec<[f32; 3]> {
    (0..SH_BASIS_COUNT)
        .map(|i| sh.coefficient(i).to_array())
        .collect()
}

/// Convert Rgba16Float LUT texels (R = scale, G = bias) to 8-bit RGBA.
pub fn lut_to_rgba8(texels: &[u8]) -> Vec<u8> {
    let halves: Vec<f16> = bytemuck::pod_collect_to_vec(texels);
    let quantize = |v: f16| (v.to_f32().clamp(0.0, 1.0) * 255.0).round() as u8;
    halves
        .chunks_exact(4)
        .flat_map(|px| [quantize(px[0]), quantize(px[1]), 0, 255])
        .collect()
}

fn write_lut_png(manager: &EnvironmentManager, path: &Path) -> anyhow::Result<()> {
    let Some(lut) = manager.env_brdf() else {
        bail!("BRDF LUT was not baked");
    };
    let ctx = manager.context();
    let texels = read_texture_mip(&ctx.device, &ctx.queue, lut, 0)?;
    let rgba = lut_to_rgba8(&texels);
    let image = image::RgbaImage::from_raw(lut.width(), lut.height(), rgba)
        .context("LUT readback has the wrong size")?;
    image
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

/// Bake `args.input` and write the requested outputs.
pub fn run_bake(args: &BakeArgs) -> anyhow::Result<()> {
    let config = args.resolve_config()?;
    let ctx = GpuContext::new().context("creating GPU device")?;
    let mut registry = PipelineRegistry::new(ctx.device.clone());
    let mut manager = EnvironmentManager::new(ctx, &mut registry, config.environment.clone())?;

    let index = manager
        .load_environment(&args.input)
        .with_context(|| format!("baking '{}'", args.input.display()))?;
    let env = manager
        .environment(index)
        .context("environment missing after load")?;

    println!(
        "{}: {}x{} -> {}² cube, {} prefiltered mips{}",
        env.label,
        env.source_size.0,
        env.source_size.1,
        manager.cubemap_resolution(),
        manager.prefiltered_mips(),
        if env.from_cache { " (cached)" } else { "" }
    );
    let triples = sh_triples(&env.sh);
    for (i, [r, g, b]) in triples.iter().enumerate() {
        println!("  sh[{i}] = ({r:+.6}, {g:+.6}, {b:+.6})");
    }

    if let Some(path) = &args.sh_json {
        let report = ShReport {
            source: &env.label,
            cubemap_resolution: manager.cubemap_resolution(),
            coefficients: triples,
        };
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("writing '{}'", path.display()))?;
        println!("wrote SH to {}", path.display());
    }

    if let Some(path) = &args.lut_png {
        manager.compute_env_brdf();
        write_lut_png(&manager, path)?;
        println!("wrote BRDF LUT to {}", path.display());
    }
    Ok(())
}
