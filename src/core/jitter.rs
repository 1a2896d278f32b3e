//! Sub-pixel projection jitter for temporal anti-aliasing.
//!
//! A fixed 16-entry Halton(2,3) table drives the sequence. Offsets are
//! centred on the pixel and exposed in UV, NDC and pixel units.

use glam::{Mat4, Vec2, Vec4};

/// Frames before the jitter pattern repeats.
pub const JITTER_SEQUENCE_LENGTH: usize = 16;

/// Raw Halton(2,3) points, indices 1..=16 of the sequence.
pub const HALTON_SEQUENCE: [[f32; 2]; JITTER_SEQUENCE_LENGTH] = [
    [0.500000, 0.333333],
    [0.250000, 0.666667],
    [0.750000, 0.111111],
    [0.125000, 0.444444],
    [0.625000, 0.777778],
    [0.375000, 0.222222],
    [0.875000, 0.555556],
    [0.062500, 0.888889],
    [0.562500, 0.037037],
    [0.312500, 0.370370],
    [0.812500, 0.703704],
    [0.187500, 0.148148],
    [0.687500, 0.481481],
    [0.437500, 0.814815],
    [0.937500, 0.259259],
    [0.031250, 0.592593],
];

/// Radical-inverse Halton value for `index` in `base`.
#[inline]
pub fn halton(index: u32, base: u32) -> f32 {
    let mut result = 0.0f32;
    let mut f = 1.0f32;
    let mut i = index;
    while i > 0 {
        f /= base as f32;
        result += f * (i % base) as f32;
        i /= base;
    }
    result
}

/// One frame's jitter in the three unit systems the renderer needs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Jitter {
    /// Offset in texture-coordinate units
    pub uv: Vec2,
    /// Offset in clip-space units: `2 * uv` with y negated, since NDC +y points up
    pub ndc: Vec2,
    /// Offset in pixels, in [-0.5, 0.5] at scale 1
    pub pixels: Vec2,
}

impl Jitter {
    /// Jitter for table entry `index` (wrapped) at `resolution`.
    pub fn from_index(index: usize, resolution: (u32, u32), scale: f32) -> Self {
        let [x, y] = HALTON_SEQUENCE[index % JITTER_SEQUENCE_LENGTH];
        let pixels = (Vec2::new(x, y) - Vec2::splat(0.5)) * scale;
        let uv = pixels / Vec2::new(resolution.0.max(1) as f32, resolution.1.max(1) as f32);
        Self {
            uv,
            ndc: Vec2::new(2.0 * uv.x, -2.0 * uv.y),
            pixels,
        }
    }
}

/// Cursor into the jitter table, advanced once per resolved frame.
#[derive(Debug, Clone, Copy)]
pub struct JitterSequence {
    index: usize,
    scale: f32,
}

impl Default for JitterSequence {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl JitterSequence {
    pub fn new(scale: f32) -> Self {
        Self {
            index: 0,
            scale: scale.max(0.0),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f32) {
        self.scale = scale.max(0.0);
    }

    pub fn current(&self, resolution: (u32, u32)) -> Jitter {
        Jitter::from_index(self.index, resolution, self.scale)
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % JITTER_SEQUENCE_LENGTH;
    }
}

/// Shift `proj` so the rasterized image moves by `ndc` after the perspective divide.
///
/// The offset is added in clip space scaled by `w`, which works for both
/// perspective and orthographic projections.
#[inline]
pub fn apply_jitter(proj: Mat4, ndc: Vec2) -> Mat4 {
    let jitter_matrix = Mat4::from_cols(
        Vec4::new(1.0, 0.0, 0.0, 0.0),
        Vec4::new(0.0, 1.0, 0.0, 0.0),
        Vec4::new(0.0, 0.0, 1.0, 0.0),
        Vec4::new(ndc.x, ndc.y, 0.0, 1.0),
    );
    jitter_matrix * proj
}
