// src/core/ibl_cache.rs
// On-disk cache of baked environments keyed by source content and bake settings
// Stores SH coefficients plus every prefiltered mip so reloads skip the GPU bake
// RELEVANT FILES: src/core/environment.rs, src/core/prefilter.rs, src/core/readback.rs

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::prefilter::create_prefiltered_cube;
use crate::core::readback::read_texture_mip;
use crate::core::resources::{TrackedTexture, CUBE_FACE_COUNT};
use crate::core::sh::{ShCoefficients, SH_COEFFICIENT_COUNT};
use crate::error::{RenderError, RenderResult};

const CACHE_MAGIC: &[u8; 8] = b"IBLBAKE1";
const CACHE_VERSION: u32 = 1;
const BYTES_PER_TEXEL: usize = 16;
/// Upper bound on the JSON metadata block of a cache file.
const MAX_METADATA_LEN: usize = 64 * 1024;

/// Bake settings that change the cached output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BakeKey {
    pub cubemap_resolution: u32,
    pub prefiltered_mips: u32,
    pub sample_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u32,
    pub label: String,
    pub source_width: u32,
    pub source_height: u32,
    pub cubemap_resolution: u32,
    pub prefiltered_mips: u32,
    pub sample_count: u32,
    #[serde(default)]
    pub created_unix_secs: u64,
    pub sha256: String,
}

/// Host copy of one baked environment.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedBake {
    pub metadata: CacheMetadata,
    pub sh: ShCoefficients,
    /// RGBA32F texels per prefiltered mip, layer-major
    pub prefiltered: Vec<Vec<u8>>,
}

impl CachedBake {
    /// Download the prefiltered chain of a finished bake.
    pub fn capture(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        metadata: CacheMetadata,
        sh: ShCoefficients,
        prefiltered: &TrackedTexture,
    ) -> RenderResult<Self> {
        let mips = (0..prefiltered.mip_count())
            .map(|mip| read_texture_mip(device, queue, prefiltered, mip))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self {
            metadata,
            sh,
            prefiltered: mips,
        })
    }

    /// Recreate the prefiltered cube from the cached mips.
    pub fn upload_prefiltered(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        label: &str,
    ) -> RenderResult<TrackedTexture> {
        let resolution = self.metadata.cubemap_resolution;
        let texture = create_prefiltered_cube(
            device,
            &format!("{label}.prefiltered"),
            resolution,
            self.prefiltered.len() as u32,
        );
        for (mip, bytes) in self.prefiltered.iter().enumerate() {
            let (size, _) = texture.mip_size(mip as u32);
            let expected = size as usize * size as usize * CUBE_FACE_COUNT as usize * BYTES_PER_TEXEL;
            if bytes.len() != expected {
                return Err(RenderError::upload(format!(
                    "cached mip {mip} has {} bytes, expected {expected}",
                    bytes.len()
                )));
            }
            queue.write_texture(
                wgpu::ImageCopyTexture {
                    texture: texture.texture(),
                    mip_level: mip as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(size * BYTES_PER_TEXEL as u32),
                    rows_per_image: Some(size),
                },
                wgpu::Extent3d {
                    width: size,
                    height: size,
                    depth_or_array_layers: CUBE_FACE_COUNT,
                },
            );
        }
        Ok(texture)
    }
}

/// Directory of `<sha256>.iblbake` files.
#[derive(Debug, Clone)]
pub struct IblCache {
    dir: PathBuf,
}

impl IblCache {
    pub fn new(dir: impl Into<PathBuf>) -> RenderResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Hex SHA-256 over the source bytes and the bake settings.
    pub fn key_for(source: &[u8], key: BakeKey) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update(key.cubemap_resolution.to_le_bytes());
        hasher.update(key.prefiltered_mips.to_le_bytes());
        hasher.update(key.sample_count.to_le_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.dir.join(format!("{hash}.iblbake"))
    }

    /// `Ok(None)` when nothing is cached under `hash`; corrupt files are errors.
    pub fn load(&self, hash: &str) -> RenderResult<Option<CachedBake>> {
        let path = self.path_for(hash);
        if !path.exists() {
            return Ok(None);
        }
        let mut reader = BufReader::new(File::open(&path)?);
        let bake = read_bake(&mut reader)?;
        if bake.metadata.sha256 != hash {
            return Err(RenderError::io(format!(
                "cache '{}' was written for a different source",
                path.display()
            )));
        }
        log::info!(
            "Loaded IBL cache '{}' ({:.2} MiB)",
            path.display(),
            bake.payload_bytes() as f32 / (1024.0 * 1024.0)
        );
        Ok(Some(bake))
    }

    pub fn store(&self, bake: &CachedBake) -> RenderResult<PathBuf> {
        let path = self.path_for(&bake.metadata.sha256);
        let mut writer = BufWriter::new(File::create(&path)?);
        write_bake(&mut writer, bake)?;
        writer.flush()?;
        log::info!(
            "Wrote IBL cache '{}' ({:.2} MiB)",
            path.display(),
            bake.payload_bytes() as f32 / (1024.0 * 1024.0)
        );
        Ok(path)
    }
}

impl CachedBake {
    fn payload_bytes(&self) -> usize {
        self.prefiltered.iter().map(Vec::len).sum::<usize>() + SH_COEFFICIENT_COUNT * 4
    }
}

impl CacheMetadata {
    pub fn new(label: &str, source_size: (u32, u32), key: BakeKey, sha256: String) -> Self {
        Self {
            version: CACHE_VERSION,
            label: label.to_string(),
            source_width: source_size.0,
            source_height: source_size.1,
            cubemap_resolution: key.cubemap_resolution,
            prefiltered_mips: key.prefiltered_mips,
            sample_count: key.sample_count,
            created_unix_secs: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            sha256,
        }
    }
}

pub fn write_bake<W: Write>(writer: &mut W, bake: &CachedBake) -> RenderResult<()> {
    writer.write_all(CACHE_MAGIC)?;
    let meta_json = serde_json::to_vec(&bake.metadata)?;
    writer.write_all(&(meta_json.len() as u32).to_le_bytes())?;
    writer.write_all(&meta_json)?;
    writer.write_all(bytemuck::cast_slice(bake.sh.as_slice()))?;
    for mip in &bake.prefiltered {
        write_blob(writer, mip)?;
    }
    Ok(())
}

pub fn read_bake<R: Read>(reader: &mut R) -> RenderResult<CachedBake> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(RenderError::io("invalid IBL cache magic"));
    }
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let meta_len = u32::from_le_bytes(len_bytes) as usize;
    if meta_len > MAX_METADATA_LEN {
        return Err(RenderError::io(format!(
            "IBL cache metadata of {meta_len} bytes exceeds {MAX_METADATA_LEN}"
        )));
    }
    let mut meta_buf = vec![0u8; meta_len];
    reader.read_exact(&mut meta_buf)?;
    let metadata: CacheMetadata = serde_json::from_slice(&meta_buf)?;
    if metadata.version != CACHE_VERSION {
        return Err(RenderError::io(format!(
            "IBL cache version {} is not {CACHE_VERSION}",
            metadata.version
        )));
    }

    let mut sh_bytes = [0u8; SH_COEFFICIENT_COUNT * 4];
    reader.read_exact(&mut sh_bytes)?;
    let values: Vec<f32> = bytemuck::pod_collect_to_vec(&sh_bytes);
    let sh = ShCoefficients::from_slice(&values)
        .ok_or_else(|| RenderError::io("truncated SH block"))?;

    let prefiltered = (0..metadata.prefiltered_mips)
        .map(|_| read_blob(reader))
        .collect::<RenderResult<Vec<_>>>()?;
    Ok(CachedBake {
        metadata,
        sh,
        prefiltered,
    })
}

fn read_blob<R: Read>(reader: &mut R) -> RenderResult<Vec<u8>> {
    let mut len_bytes = [0u8; 8];
    reader.read_exact(&mut len_bytes)?;
    let len = u64::from_le_bytes(len_bytes) as usize;
    let mut buf = Vec::new();
    reader.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(RenderError::io(format!(
            "cache blob truncated: {} of {len} bytes",
            buf.len()
        )));
    }
    Ok(buf)
}

fn write_blob<W: Write>(writer: &mut W, data: &[u8]) -> RenderResult<()> {
    writer.write_all(&(data.len() as u64).to_le_bytes())?;
    writer.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: BakeKey = BakeKey {
        cubemap_resolution: 4,
        prefiltered_mips: 2,
        sample_count: 16,
    };

    fn sample_bake() -> CachedBake {
        let mut sh = ShCoefficients::default();
        sh.0[0] = 11.0;
        sh.0[5] = -0.5;
        CachedBake {
            metadata: CacheMetadata::new("unit", (8, 4), KEY, IblCache::key_for(b"abc", KEY)),
            sh,
            prefiltered: vec![vec![1u8; 4 * 4 * 6 * 16], vec![2u8; 2 * 2 * 6 * 16]],
        }
    }

    #[test]
    fn test_stream_round_trip() {
        let bake = sample_bake();
        let mut bytes = Vec::new();
        write_bake(&mut bytes, &bake).unwrap();
        assert_eq!(&bytes[..8], CACHE_MAGIC);
        let back = read_bake(&mut bytes.as_slice()).unwrap();
        assert_eq!(back, bake);
    }

    #[test]
    fn test_bad_magic_is_rejected() {
        let mut bytes = Vec::new();
        write_bake(&mut bytes, &sample_bake()).unwrap();
        bytes[0] = b'X';
        let err = read_bake(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.category(), "IO");
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let mut bytes = Vec::new();
        write_bake(&mut bytes, &sample_bake()).unwrap();
        bytes.truncate(bytes.len() - 10);
        assert!(read_bake(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_oversized_metadata_length_is_rejected() {
        let mut bytes = CACHE_MAGIC.to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        let err = read_bake(&mut bytes.as_slice()).unwrap_err();
        assert_eq!(err.category(), "IO");
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[test]
    fn test_key_depends_on_settings() {
        let a = IblCache::key_for(b"abc", KEY);
        let b = IblCache::key_for(
            b"abc",
            BakeKey {
                sample_count: 32,
                ..KEY
            },
        );
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(a, IblCache::key_for(b"abc", KEY));
    }
}
