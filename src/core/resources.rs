// src/core/resources.rs
// Owned GPU textures with stable ids for state tracking
// Every pass owns its images through TrackedTexture and releases them on drop
// RELEVANT FILES: src/core/barriers.rs, src/core/readback.rs, src/core/mipmap.rs

use std::sync::atomic::{AtomicU64, Ordering};

use wgpu::util::DeviceExt;

use crate::core::mipmap::{calculate_mip_levels, mip_extent};

pub const CUBE_FACE_COUNT: u32 = 6;

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a GPU resource inside a [`crate::core::barriers::StateTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn new() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl Default for ResourceId {
    fn default() -> Self {
        Self::new()
    }
}

/// Creation parameters for a [`TrackedTexture`].
#[derive(Debug, Clone)]
pub struct TextureSpec {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
    pub mip_count: u32,
    pub format: wgpu::TextureFormat,
    pub usage: wgpu::TextureUsages,
}

impl TextureSpec {
    pub fn d2(label: impl Into<String>, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            label: label.into(),
            width,
            height,
            layers: 1,
            mip_count: 1,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
        }
    }

    pub fn cube(label: impl Into<String>, resolution: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            layers: CUBE_FACE_COUNT,
            ..Self::d2(label, resolution, resolution, format)
        }
    }

    /// Allocate the full chain `floor(log2(max(w, h))) + 1`.
    pub fn with_full_mips(mut self) -> Self {
        self.mip_count = calculate_mip_levels(self.width, self.height);
        self
    }

    pub fn with_mips(mut self, mip_count: u32) -> Self {
        self.mip_count = mip_count.max(1);
        self
    }

    pub fn with_usage(mut self, usage: wgpu::TextureUsages) -> Self {
        self.usage = usage;
        self
    }
}

/// A texture exclusively owned by one component, tagged with a [`ResourceId`].
#[derive(Debug)]
pub struct TrackedTexture {
    id: ResourceId,
    texture: wgpu::Texture,
    spec: TextureSpec,
}

impl TrackedTexture {
    pub fn new(device: &wgpu::Device, spec: TextureSpec) -> Self {
        let texture = device.create_texture(&descriptor(&spec));
        Self {
            id: ResourceId::new(),
            texture,
            spec,
        }
    }

    /// Create and fill mip 0 of every layer from `bytes` (layer-major, tightly packed).
    pub fn with_data(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        spec: TextureSpec,
        bytes: &[u8],
    ) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                mip_level_count: 1,
                ..descriptor(&spec)
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytes,
        );
        Self {
            id: ResourceId::new(),
            texture,
            spec: TextureSpec {
                mip_count: 1,
                ..spec
            },
        }
    }

    /// Track a texture created outside this crate (e.g. the renderer's depth buffer).
    pub fn wrap(texture: wgpu::Texture, label: impl Into<String>) -> Self {
        let spec = TextureSpec {
            label: label.into(),
            width: texture.width(),
            height: texture.height(),
            layers: texture.depth_or_array_layers(),
            mip_count: texture.mip_level_count(),
            format: texture.format(),
            usage: texture.usage(),
        };
        Self {
            id: ResourceId::new(),
            texture,
            spec,
        }
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn label(&self) -> &str {
        &self.spec.label
    }

    pub fn width(&self) -> u32 {
        self.spec.width
    }

    pub fn height(&self) -> u32 {
        self.spec.height
    }

    pub fn layers(&self) -> u32 {
        self.spec.layers
    }

    pub fn mip_count(&self) -> u32 {
        self.spec.mip_count
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.spec.format
    }

    /// Extent of `mip`, truncated by right shift and clamped to 1.
    pub fn mip_size(&self, mip: u32) -> (u32, u32) {
        mip_extent(self.spec.width, self.spec.height, mip)
    }

    /// View over every mip and layer with the texture's natural dimension.
    pub fn view(&self) -> wgpu::TextureView {
        let dimension = if self.spec.layers == CUBE_FACE_COUNT {
            wgpu::TextureViewDimension::Cube
        } else if self.spec.layers > 1 {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        };
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{}.view", self.spec.label)),
            dimension: Some(dimension),
            ..Default::default()
        })
    }

    /// Every mip and layer viewed as a 2D array.
    pub fn array_view(&self) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{}.array", self.spec.label)),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            array_layer_count: Some(self.spec.layers),
            ..Default::default()
        })
    }

    /// Single-mip view of every layer as a 2D array, regardless of layer count.
    pub fn mip_view_array(&self, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{}.mip{mip}.array", self.spec.label)),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(self.spec.layers),
            ..Default::default()
        })
    }

    /// Single-mip view for storage writes or per-level reads. Multi-layer
    /// textures get a 2D array view, single-layer ones a plain 2D view.
    pub fn mip_view(&self, mip: u32) -> wgpu::TextureView {
        let dimension = if self.spec.layers > 1 {
            wgpu::TextureViewDimension::D2Array
        } else {
            wgpu::TextureViewDimension::D2
        };
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&format!("{}.mip{mip}", self.spec.label)),
            format: None,
            dimension: Some(dimension),
            aspect: wgpu::TextureAspect::All,
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: 0,
            array_layer_count: Some(self.spec.layers),
        })
    }
}

fn descriptor(spec: &TextureSpec) -> wgpu::TextureDescriptor<'_> {
    wgpu::TextureDescriptor {
        label: Some(&spec.label),
        size: wgpu::Extent3d {
            width: spec.width,
            height: spec.height,
            depth_or_array_layers: spec.layers,
        },
        mip_level_count: spec.mip_count,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: spec.format,
        usage: spec.usage,
        view_formats: &[],
    }
}
