//! Second-order spherical harmonics for diffuse irradiance.
//!
//! Coefficients are stored band-major (l = 0..2, m = -l..l) and channel-minor
//! (R, G, B per coefficient): 9 × 3 = 27 floats. The stored values are already
//! convolved with the clamped-cosine lobe, so [`ShCoefficients::irradiance`]
//! returns irradiance directly.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::core::envmap::{texel_direction, texel_solid_angle};

pub const SH_BASIS_COUNT: usize = 9;
pub const SH_COEFFICIENT_COUNT: usize = SH_BASIS_COUNT * 3;

/// Cosine-lobe convolution weights `Â_l` per band.
pub const COSINE_LOBE: [f32; 3] = [PI, 2.0 * PI / 3.0, PI / 4.0];

/// DC coefficient produced by a uniform radiance of 1: `π · 2√π`.
pub fn uniform_dc_irradiance() -> f32 {
    2.0 * PI * PI.sqrt()
}

/// Real SH basis evaluated at unit direction `d`.
pub fn sh_basis(d: Vec3) -> [f32; SH_BASIS_COUNT] {
    [
        0.282_095,
        0.488_603 * d.y,
        0.488_603 * d.z,
        0.488_603 * d.x,
        1.092_548 * d.x * d.y,
        1.092_548 * d.y * d.z,
        0.315_392 * (3.0 * d.z * d.z - 1.0),
        1.092_548 * d.x * d.z,
        0.546_274 * (d.x * d.x - d.y * d.y),
    ]
}

fn band_of(basis: usize) -> usize {
    match basis {
        0 => 0,
        1..=3 => 1,
        _ => 2,
    }
}

/// Cosine-convolved SH projection of an environment, 27 floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShCoefficients(pub [f32; SH_COEFFICIENT_COUNT]);

impl Default for ShCoefficients {
    fn default() -> Self {
        Self([0.0; SH_COEFFICIENT_COUNT])
    }
}

impl ShCoefficients {
    pub fn from_slice(values: &[f32]) -> Option<Self> {
        let arr: [f32; SH_COEFFICIENT_COUNT] = values.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// RGB value of basis function `i`.
    pub fn coefficient(&self, i: usize) -> Vec3 {
        Vec3::new(self.0[i * 3], self.0[i * 3 + 1], self.0[i * 3 + 2])
    }

    /// Irradiance arriving at a surface with normal `n`.
    pub fn irradiance(&self, n: Vec3) -> Vec3 {
        let basis = sh_basis(n.normalize());
        basis
            .iter()
            .enumerate()
            .fold(Vec3::ZERO, |acc, (i, y)| acc + self.coefficient(i) * *y)
    }

    /// Largest absolute component outside band 0.
    pub fn max_higher_band_magnitude(&self) -> f32 {
        self.0[3..].iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }
}

/// Accumulates radiance samples into convolved SH coefficients.
#[derive(Debug, Default, Clone)]
pub struct ShAccumulator {
    sums: [f64; SH_COEFFICIENT_COUNT],
    weight: f64,
}

impl ShAccumulator {
    pub fn add(&mut self, direction: Vec3, radiance: Vec3, solid_angle: f32) {
        let basis = sh_basis(direction);
        for (i, y) in basis.iter().enumerate() {
            let w = (*y * solid_angle) as f64;
            self.sums[i * 3] += radiance.x as f64 * w;
            self.sums[i * 3 + 1] += radiance.y as f64 * w;
            self.sums[i * 3 + 2] += radiance.z as f64 * w;
        }
        self.weight += solid_angle as f64;
    }

    /// Total solid angle accumulated so far (4π for a full sphere).
    pub fn total_solid_angle(&self) -> f64 {
        self.weight
    }

    pub fn finish(&self) -> ShCoefficients {
        let mut out = [0.0f32; SH_COEFFICIENT_COUNT];
        for (i, v) in out.iter_mut().enumerate() {
            *v = (self.sums[i] as f32) * COSINE_LOBE[band_of(i / 3)];
        }
        ShCoefficients(out)
    }
}

/// Irradiance at normal `n` from a raw 27-float coefficient slice.
///
/// Returns black when `coefficients` is not exactly 27 long.
pub fn evaluate_irradiance(coefficients: &[f32], n: Vec3) -> Vec3 {
    ShCoefficients::from_slice(coefficients)
        .map(|sh| sh.irradiance(n))
        .unwrap_or(Vec3::ZERO)
}

/// CPU reference of the GPU projection over one cube mip.
///
/// `faces[f]` holds `size`² RGBA32F texels of face `f`.
pub fn project_cubemap(faces: &[Vec<f32>; 6], size: u32) -> ShCoefficients {
    let mut acc = ShAccumulator::default();
    for (face, data) in faces.iter().enumerate() {
        for y in 0..size {
            for x in 0..size {
                let idx = ((y * size + x) * 4) as usize;
                let radiance = Vec3::new(data[idx], data[idx + 1], data[idx + 2]);
                acc.add(
                    texel_direction(face as u32, x, y, size),
                    radiance,
                    texel_solid_angle(x, y, size),
                );
            }
        }
    }
    acc.finish()
}
