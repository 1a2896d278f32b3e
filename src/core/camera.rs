//! Per-frame camera uniform with TAA jitter baked into the projection.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2};

use crate::core::jitter::{apply_jitter, Jitter};

/// GPU layout of the camera block, std140-compatible.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraData {
    pub proj_view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub inv_proj_view: [[f32; 4]; 4],
    pub ws_pos: [f32; 3],
    pub _pad0: f32,
    pub ws_right: [f32; 3],
    pub _pad1: f32,
    pub ws_up: [f32; 3],
    pub _pad2: f32,
    pub ws_forward: [f32; 3],
    pub _pad3: f32,
    pub jitter_ndc: [f32; 2],
    pub jitter_pixels: [f32; 2],
}

impl CameraData {
    /// Build from an unjittered view/projection pair; `proj` is jittered here.
    pub fn new(view: Mat4, proj: Mat4, jitter: Jitter) -> Self {
        let proj = apply_jitter(proj, jitter.ndc);
        let proj_view = proj * view;
        let inv_view = view.inverse();
        Self {
            proj_view: proj_view.to_cols_array_2d(),
            proj: proj.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            inv_proj_view: proj_view.inverse().to_cols_array_2d(),
            ws_pos: inv_view.w_axis.truncate().to_array(),
            _pad0: 0.0,
            ws_right: inv_view.x_axis.truncate().normalize_or_zero().to_array(),
            _pad1: 0.0,
            ws_up: inv_view.y_axis.truncate().normalize_or_zero().to_array(),
            _pad2: 0.0,
            ws_forward: (-inv_view.z_axis.truncate()).normalize_or_zero().to_array(),
            _pad3: 0.0,
            jitter_ndc: jitter.ndc.to_array(),
            jitter_pixels: jitter.pixels.to_array(),
        }
    }
}

/// Remove this frame's jitter from a screen-space UV.
#[inline]
pub fn unjitter_uv(uv: Vec2, jitter: &Jitter) -> Vec2 {
    uv - jitter.uv
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_layout_is_16_byte_aligned() {
        assert_eq!(std::mem::size_of::<CameraData>() % 16, 0);
        assert_eq!(std::mem::size_of::<CameraData>(), 4 * 64 + 4 * 16 + 16);
    }

    #[test]
    fn test_basis_from_look_at() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 1.5, 0.1, 50.0);
        let data = CameraData::new(view, proj, Jitter::default());
        assert!((Vec3::from(data.ws_pos) - eye).length() < 1e-4);
        let forward = Vec3::from(data.ws_forward);
        assert!((forward - (-eye).normalize()).length() < 1e-4);
        assert_eq!(data.proj, proj.to_cols_array_2d());
    }

    #[test]
    fn test_jitter_reaches_projection() {
        let view = Mat4::IDENTITY;
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0);
        let jitter = Jitter::from_index(3, (64, 64), 1.0);
        let data = CameraData::new(view, proj, jitter);
        assert_ne!(data.proj, proj.to_cols_array_2d());
        assert_eq!(data.jitter_ndc, jitter.ndc.to_array());
    }

    fn screen_uv(clip: glam::Vec4) -> Vec2 {
        let ndc = clip.truncate().truncate() / clip.w;
        Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5)
    }

    #[test]
    fn test_jitter_shifts_screen_uv_by_uv_offset() {
        let view = Mat4::look_at_rh(Vec3::new(0.5, 1.0, 4.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh(1.0, 1.0, 0.1, 50.0);
        let point = glam::Vec4::new(0.3, -0.2, 0.1, 1.0);
        let plain = CameraData::new(view, proj, Jitter::default());
        for index in [0, 1, 5] {
            let jitter = Jitter::from_index(index, (64, 64), 1.0);
            let jittered = CameraData::new(view, proj, jitter);
            let a = screen_uv(Mat4::from_cols_array_2d(&plain.proj_view) * point);
            let b = screen_uv(Mat4::from_cols_array_2d(&jittered.proj_view) * point);
            assert!((b - a - jitter.uv).length() < 1e-5, "index {index}");
            assert!((unjitter_uv(b, &jitter) - a).length() < 1e-5, "index {index}");
        }
    }

    #[test]
    fn test_unjitter_uv() {
        let jitter = Jitter::from_index(1, (32, 16), 1.0);
        let uv = Vec2::new(0.5, 0.5) + jitter.uv;
        assert!((unjitter_uv(uv, &jitter) - Vec2::splat(0.5)).length() < 1e-7);
    }
}
