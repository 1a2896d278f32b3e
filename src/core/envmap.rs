//! CPU-side environment mapping math
//!
//! Cube face addressing, the equirectangular mapping and the low-discrepancy
//! sampling helpers shared by the CPU reference paths. The WGSL kernels in
//! `src/shaders/` implement the same formulas; tests compare the two.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

use crate::error::{RenderError, RenderResult};
use crate::formats::hdr::checked_len;

/// Face order: +X, -X, +Y, -Y, +Z, -Z.
pub const CUBE_FACES: [&str; 6] = ["+X", "-X", "+Y", "-Y", "+Z", "-Z"];

/// World direction through normalized face coordinate `uv` ∈ [0,1]² of `face`.
///
/// `u` runs right and `v` runs down the face, matching the WebGPU/Vulkan cube
/// sampling convention.
pub fn face_uv_to_direction(face: u32, uv: Vec2) -> Vec3 {
    let a = 2.0 * uv.x - 1.0;
    let b = 2.0 * uv.y - 1.0;
    let dir = match face {
        0 => Vec3::new(1.0, -b, -a),
        1 => Vec3::new(-1.0, -b, a),
        2 => Vec3::new(a, 1.0, b),
        3 => Vec3::new(a, -1.0, -b),
        4 => Vec3::new(a, -b, 1.0),
        _ => Vec3::new(-a, -b, -1.0),
    };
    dir.normalize()
}

/// Direction through the center of texel `(x, y)` of a `size`² face.
pub fn texel_direction(face: u32, x: u32, y: u32, size: u32) -> Vec3 {
    let uv = (Vec2::new(x as f32, y as f32) + 0.5) / size as f32;
    face_uv_to_direction(face, uv)
}

/// Inverse of [`face_uv_to_direction`]: which face a direction hits and where.
pub fn direction_to_face_uv(dir: Vec3) -> (u32, Vec2) {
    let abs = dir.abs();
    let (face, sc, tc, ma) = if abs.x >= abs.y && abs.x >= abs.z {
        if dir.x > 0.0 {
            (0, -dir.z, -dir.y, abs.x)
        } else {
            (1, dir.z, -dir.y, abs.x)
        }
    } else if abs.y >= abs.z {
        if dir.y > 0.0 {
            (2, dir.x, dir.z, abs.y)
        } else {
            (3, dir.x, -dir.z, abs.y)
        }
    } else if dir.z > 0.0 {
        (4, dir.x, -dir.y, abs.z)
    } else {
        (5, -dir.x, -dir.y, abs.z)
    };
    (face, Vec2::new(sc / ma + 1.0, tc / ma + 1.0) * 0.5)
}

/// Spherical-to-equirectangular mapping: `u = atan2(z, x)/2π + 0.5`, `v = acos(y)/π`.
pub fn direction_to_equirect_uv(dir: Vec3) -> Vec2 {
    let u = dir.z.atan2(dir.x) / (2.0 * PI) + 0.5;
    let v = dir.y.clamp(-1.0, 1.0).acos() / PI;
    Vec2::new(u, v)
}

/// Solid angle subtended by texel `(x, y)` of a `size`² cube face.
pub fn texel_solid_angle(x: u32, y: u32, size: u32) -> f32 {
    fn area(x: f32, y: f32) -> f32 {
        (x * y).atan2((x * x + y * y + 1.0).sqrt())
    }
    let inv = 2.0 / size as f32;
    let x0 = x as f32 * inv - 1.0;
    let y0 = y as f32 * inv - 1.0;
    let x1 = x0 + inv;
    let y1 = y0 + inv;
    area(x0, y0) - area(x0, y1) - area(x1, y0) + area(x1, y1)
}

/// Equirectangular RGBA32F panorama held on the CPU.
#[derive(Debug, Clone)]
pub struct EquirectImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<f32>,
}

impl EquirectImage {
    pub fn new(width: u32, height: u32, rgba: Vec<f32>) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::upload("HDR image dimensions must be positive"));
        }
        let expected = checked_len(width, height, 4)?;
        if rgba.len() != expected {
            return Err(RenderError::upload(format!(
                "HDR data length {} does not match {}x{}x4",
                rgba.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// Uniform panorama, the usual analytic test input.
    pub fn uniform(width: u32, height: u32, color: [f32; 3]) -> RenderResult<Self> {
        let texels = checked_len(width, height, 4)? / 4;
        Self::new(width, height, [color[0], color[1], color[2], 1.0].repeat(texels))
    }

    fn texel(&self, x: i32, y: i32) -> Vec3 {
        let x = x.rem_euclid(self.width as i32) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        let idx = (y * self.width as usize + x) * 4;
        Vec3::new(self.rgba[idx], self.rgba[idx + 1], self.rgba[idx + 2])
    }

    /// Bilinear lookup, wrapping horizontally and clamping vertically.
    pub fn sample_uv(&self, uv: Vec2) -> Vec3 {
        let px = uv.x * self.width as f32 - 0.5;
        let py = uv.y * self.height as f32 - 0.5;
        let x0 = px.floor();
        let y0 = py.floor();
        let fx = px - x0;
        let fy = py - y0;
        let (x0, y0) = (x0 as i32, y0 as i32);
        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }

    pub fn sample(&self, direction: Vec3) -> Vec3 {
        self.sample_uv(direction_to_equirect_uv(direction.normalize()))
    }

    /// CPU reference of the equirect → cube conversion for one face at `size`².
    pub fn project_face(&self, face: u32, size: u32) -> Vec<f32> {
        let mut out = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let c = self.sample(texel_direction(face, x, y, size));
                out.extend_from_slice(&[c.x, c.y, c.z, 1.0]);
            }
        }
        out
    }
}

/// Hammersley point `i` of `n`.
pub fn hammersley(i: u32, n: u32) -> Vec2 {
    Vec2::new(i as f32 / n as f32, radical_inverse_vdc(i))
}

/// Van der Corput radical inverse in base 2.
pub fn radical_inverse_vdc(mut bits: u32) -> f32 {
    bits = (bits << 16) | (bits >> 16);
    bits = ((bits & 0x5555_5555) << 1) | ((bits & 0xAAAA_AAAA) >> 1);
    bits = ((bits & 0x3333_3333) << 2) | ((bits & 0xCCCC_CCCC) >> 2);
    bits = ((bits & 0x0F0F_0F0F) << 4) | ((bits & 0xF0F0_F0F0) >> 4);
    bits = ((bits & 0x00FF_00FF) << 8) | ((bits & 0xFF00_FF00) >> 8);
    bits as f32 * 2.328_306_4e-10
}

/// GGX-distributed half vector around `n` for perceptual `roughness`.
pub fn importance_sample_ggx(xi: Vec2, n: Vec3, roughness: f32) -> Vec3 {
    let alpha = roughness * roughness;
    let phi = 2.0 * PI * xi.x;
    let cos_theta = ((1.0 - xi.y) / (1.0 + (alpha * alpha - 1.0) * xi.y)).sqrt();
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let h = Vec3::new(phi.cos() * sin_theta, phi.sin() * sin_theta, cos_theta);

    let up = if n.z.abs() < 0.999 { Vec3::Z } else { Vec3::X };
    let tangent = up.cross(n).normalize();
    let bitangent = n.cross(tangent);
    (tangent * h.x + bitangent * h.y + n * h.z).normalize()
}
