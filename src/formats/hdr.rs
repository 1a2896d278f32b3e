//! Radiance HDR (.hdr) reader and writer
//!
//! Decodes new-style RLE and flat RGBE scanlines into linear RGB32F, and
//! encodes RGB32F back into either form. Only the standard `-Y h +X w`
//! orientation is accepted.

use crate::error::{RenderError, RenderResult};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Width range in which new-style RLE scanlines are legal.
const RLE_MIN_WIDTH: u32 = 8;
const RLE_MAX_WIDTH: u32 = 0x7fff;

/// Largest side accepted from a file header.
pub const MAX_DIMENSION: u32 = 1 << 15;

/// Element count of a `width`x`height` image with `channels` per pixel.
pub(crate) fn checked_len(width: u32, height: u32, channels: usize) -> RenderResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| RenderError::upload(format!("image size {width}x{height} overflows")))
}

/// Decoded HDR image, linear RGB32F, row-major, top row first.
#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    /// 3 floats per pixel
    pub data: Vec<f32>,
}

impl HdrImage {
    pub fn new(width: u32, height: u32, data: Vec<f32>) -> RenderResult<Self> {
        if width == 0 || height == 0 {
            return Err(RenderError::upload("HDR image dimensions cannot be zero"));
        }
        let expected = checked_len(width, height, 3)?;
        if data.len() != expected {
            return Err(RenderError::upload(format!(
                "HDR data has {} floats, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// RGBA32F copy with alpha 1, the layout the GPU upload expects.
    pub fn to_rgba(&self) -> Vec<f32> {
        let mut rgba = Vec::with_capacity(self.pixel_count() * 4);
        for px in self.data.chunks_exact(3) {
            rgba.extend_from_slice(&[px[0], px[1], px[2], 1.0]);
        }
        rgba
    }
}

/// Load a Radiance HDR file.
pub fn load_hdr<P: AsRef<Path>>(path: P) -> RenderResult<HdrImage> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        RenderError::io(format!("Failed to open HDR file '{}': {e}", path.display()))
    })?;
    decode_hdr(&mut BufReader::new(file))
}

/// Decode an HDR stream from any buffered reader.
pub fn decode_hdr<R: BufRead>(reader: &mut R) -> RenderResult<HdrImage> {
    let (width, height) = parse_header(reader)?;
    // Header dimensions are untrusted; reserve one decoded row at a time
    let mut data = Vec::new();
    for y in 0..height {
        let scanline = read_scanline(reader, width, y)?;
        data.reserve(scanline.len() * 3);
        for [r, g, b, e] in scanline {
            let (rf, gf, bf) = rgbe_to_rgb(r, g, b, e);
            data.extend_from_slice(&[rf, gf, bf]);
        }
    }
    HdrImage::new(width, height, data)
}

/// Write `image` with flat (uncompressed) scanlines.
pub fn write_hdr<P: AsRef<Path>>(path: P, image: &HdrImage) -> RenderResult<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    encode_hdr(&mut writer, image, false)?;
    writer.flush()?;
    Ok(())
}

/// Encode `image`. With `rle` set, widths in 8..=32767 use new-style RLE.
pub fn encode_hdr<W: Write>(writer: &mut W, image: &HdrImage, rle: bool) -> RenderResult<()> {
    write!(
        writer,
        "#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y {} +X {}\n",
        image.height, image.width
    )?;
    let use_rle = rle && (RLE_MIN_WIDTH..=RLE_MAX_WIDTH).contains(&image.width);
    let row_len = image.width as usize * 3;
    for row in image.data.chunks_exact(row_len) {
        let pixels: Vec<[u8; 4]> = row
            .chunks_exact(3)
            .map(|px| rgb_to_rgbe(px[0], px[1], px[2]))
            .collect();
        if use_rle {
            write_rle_scanline(writer, &pixels)?;
        } else {
            for px in &pixels {
                writer.write_all(px)?;
            }
        }
    }
    Ok(())
}

fn read_line<R: BufRead>(reader: &mut R, line: &mut String) -> RenderResult<usize> {
    line.clear();
    reader
        .read_line(line)
        .map_err(|e| RenderError::io(format!("Failed to read HDR header: {e}")))
}

fn parse_header<R: BufRead>(reader: &mut R) -> RenderResult<(u32, u32)> {
    let mut line = String::new();
    read_line(reader, &mut line)?;
    if !line.starts_with("#?RADIANCE") && !line.starts_with("#?RGBE") {
        return Err(RenderError::upload("Invalid HDR file: missing magic header"));
    }

    let mut format_found = false;
    while read_line(reader, &mut line)? > 0 {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(format) = trimmed.strip_prefix("FORMAT=") {
            if format != "32-bit_rle_rgbe" && format != "32-bit_rle_xyze" {
                return Err(RenderError::upload(format!("Unsupported HDR format: {format}")));
            }
            format_found = true;
        }
    }
    if !format_found {
        return Err(RenderError::upload("HDR file missing FORMAT specification"));
    }

    read_line(reader, &mut line)?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    let (height, width) = match parts.as_slice() {
        ["-Y", h, "+X", w] => (
            h.parse::<u32>()
                .map_err(|_| RenderError::upload(format!("Invalid HDR height: {h}")))?,
            w.parse::<u32>()
                .map_err(|_| RenderError::upload(format!("Invalid HDR width: {w}")))?,
        ),
        _ => {
            return Err(RenderError::upload(format!(
                "Unsupported HDR resolution line: {}",
                line.trim()
            )))
        }
    };
    if width == 0 || height == 0 {
        return Err(RenderError::upload("HDR image dimensions cannot be zero"));
    }
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(RenderError::upload(format!(
            "HDR image {width}x{height} exceeds {MAX_DIMENSION} per side"
        )));
    }
    Ok((width, height))
}

fn read_scanline<R: Read>(reader: &mut R, width: u32, y: u32) -> RenderResult<Vec<[u8; 4]>> {
    let mut head = [0u8; 4];
    reader.read_exact(&mut head).map_err(|e| {
        RenderError::upload(format!("HDR data truncated at row {y}: {e}"))
    })?;

    let is_rle = head[0] == 2 && head[1] == 2 && head[2] & 0x80 == 0;
    if is_rle {
        let encoded_width = ((head[2] as u32) << 8) | head[3] as u32;
        if encoded_width != width {
            return Err(RenderError::upload(format!(
                "HDR row {y} declares width {encoded_width}, image is {width}"
            )));
        }
        return read_rle_scanline(reader, width, y);
    }

    let mut scanline = vec![[0u8; 4]; width as usize];
    scanline[0] = head;
    for pixel in scanline.iter_mut().skip(1) {
        reader.read_exact(pixel).map_err(|e| {
            RenderError::upload(format!("HDR data truncated at row {y}: {e}"))
        })?;
    }
    Ok(scanline)
}

fn read_byte<R: Read>(reader: &mut R, y: u32) -> RenderResult<u8> {
    let mut b = [0u8; 1];
    reader
        .read_exact(&mut b)
        .map_err(|e| RenderError::upload(format!("HDR RLE data truncated at row {y}: {e}")))?;
    Ok(b[0])
}

/// Components are stored as four separate planes of runs.
fn read_rle_scanline<R: Read>(reader: &mut R, width: u32, y: u32) -> RenderResult<Vec<[u8; 4]>> {
    let width = width as usize;
    let mut scanline = vec![[0u8; 4]; width];
    for component in 0..4 {
        let mut pos = 0usize;
        while pos < width {
            let code = read_byte(reader, y)? as usize;
            if code > 128 {
                let count = code - 128;
                if pos + count > width {
                    return Err(RenderError::upload(format!("HDR RLE run overruns row {y}")));
                }
                let value = read_byte(reader, y)?;
                for px in &mut scanline[pos..pos + count] {
                    px[component] = value;
                }
                pos += count;
            } else {
                if code == 0 || pos + code > width {
                    return Err(RenderError::upload(format!(
                        "HDR literal run of {code} invalid at row {y}"
                    )));
                }
                for px in &mut scanline[pos..pos + code] {
                    px[component] = read_byte(reader, y)?;
                }
                pos += code;
            }
        }
    }
    Ok(scanline)
}

fn write_rle_scanline<W: Write>(writer: &mut W, pixels: &[[u8; 4]]) -> RenderResult<()> {
    let width = pixels.len();
    writer.write_all(&[2, 2, (width >> 8) as u8, (width & 0xff) as u8])?;
    let mut plane = Vec::with_capacity(width);
    for component in 0..4 {
        plane.clear();
        plane.extend(pixels.iter().map(|px| px[component]));
        writer.write_all(&encode_rle_plane(&plane))?;
    }
    Ok(())
}

fn run_length_at(data: &[u8], i: usize, max: usize) -> usize {
    let mut run = 1;
    while i + run < data.len() && run < max && data[i + run] == data[i] {
        run += 1;
    }
    run
}

/// Runs of 4+ equal bytes become `128 + n, value`; the rest are literal spans.
fn encode_rle_plane(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64 + 1);
    let mut i = 0;
    while i < data.len() {
        let run = run_length_at(data, i, 127);
        if run >= 4 {
            out.push(128 + run as u8);
            out.push(data[i]);
            i += run;
            continue;
        }
        let start = i;
        while i < data.len() && i - start < 128 && run_length_at(data, i, 4) < 4 {
            i += 1;
        }
        out.push((i - start) as u8);
        out.extend_from_slice(&data[start..i]);
    }
    out
}

#[inline]
fn rgbe_to_rgb(r: u8, g: u8, b: u8, e: u8) -> (f32, f32, f32) {
    if e == 0 {
        (0.0, 0.0, 0.0)
    } else {
        let scale = 2.0f32.powi(e as i32 - 128 - 8);
        (r as f32 * scale, g as f32 * scale, b as f32 * scale)
    }
}

#[inline]
fn rgb_to_rgbe(r: f32, g: f32, b: f32) -> [u8; 4] {
    let max = r.max(g).max(b);
    if !max.is_finite() || max <= 1e-32 {
        return [0, 0, 0, 0];
    }
    // frexp: max = m * 2^exp with m in [0.5, 1)
    let exp = max.log2().floor() as i32 + 1;
    let scale = 256.0 / 2.0f32.powi(exp);
    let exp = exp.clamp(-128, 127);
    [
        (r.max(0.0) * scale).min(255.0) as u8,
        (g.max(0.0) * scale).min(255.0) as u8,
        (b.max(0.0) * scale).min(255.0) as u8,
        (exp + 128) as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> HdrImage {
        let mut data = Vec::new();
        for y in 0..height {
            for x in 0..width {
                // Long flat spans plus a varying channel exercise both run kinds.
                data.extend_from_slice(&[1.0, (x / 5) as f32 * 0.5, y as f32 + 0.25]);
            }
        }
        HdrImage::new(width, height, data).unwrap()
    }

    fn round_trip(image: &HdrImage, rle: bool) -> HdrImage {
        let mut bytes = Vec::new();
        encode_hdr(&mut bytes, image, rle).unwrap();
        decode_hdr(&mut bytes.as_slice()).unwrap()
    }

    #[test]
    fn test_rgbe_to_rgb_zero() {
        assert_eq!(rgbe_to_rgb(0, 0, 0, 0), (0.0, 0.0, 0.0));
    }

    #[test]
    fn test_rgbe_to_rgb_bright() {
        // e = 140 -> 2^(140-136) = 16
        let (r, g, b) = rgbe_to_rgb(255, 128, 64, 140);
        assert_eq!((r, g, b), (255.0 * 16.0, 128.0 * 16.0, 64.0 * 16.0));
    }

    #[test]
    fn test_unit_white_is_exact() {
        let [r, g, b, e] = rgb_to_rgbe(1.0, 1.0, 1.0);
        assert_eq!(rgbe_to_rgb(r, g, b, e), (1.0, 1.0, 1.0));
    }

    #[test]
    fn test_flat_round_trip() {
        let image = gradient(3, 2);
        assert_eq!(round_trip(&image, false), image);
    }

    #[test]
    fn test_rle_round_trip() {
        let image = gradient(40, 3);
        let mut bytes = Vec::new();
        encode_hdr(&mut bytes, &image, true).unwrap();
        let mut flat = Vec::new();
        encode_hdr(&mut flat, &image, false).unwrap();
        assert!(bytes.len() < flat.len());
        assert_eq!(decode_hdr(&mut bytes.as_slice()).unwrap(), image);
    }

    #[test]
    fn test_rle_plane_encoding() {
        let data = [7u8, 7, 7, 7, 7, 1, 2, 3];
        assert_eq!(encode_rle_plane(&data), vec![133, 7, 3, 1, 2, 3]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let bytes = b"P6\n2 2\n255\n".to_vec();
        let err = decode_hdr(&mut bytes.as_slice()).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_rejects_missing_format() {
        let bytes = b"#?RADIANCE\n\n-Y 1 +X 1\n\x80\x80\x80\x81".to_vec();
        assert!(decode_hdr(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_rejects_flipped_orientation() {
        let bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n+Y 1 +X 1\n\x80\x80\x80\x81".to_vec();
        assert!(decode_hdr(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_rle_overrun_is_error() {
        let mut bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 1 +X 8\n".to_vec();
        bytes.extend_from_slice(&[2, 2, 0, 8]);
        bytes.extend_from_slice(&[128 + 9, 5]);
        assert!(decode_hdr(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_oversized_header_is_error() {
        let bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 4000000000 +X 4000000000\n";
        let err = decode_hdr(&mut &bytes[..]).unwrap_err();
        assert_eq!(err.category(), "Upload");
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[test]
    fn test_large_header_without_pixels_is_truncation() {
        let bytes = b"#?RADIANCE\nFORMAT=32-bit_rle_rgbe\n\n-Y 32768 +X 32768\n\x80\x80\x80\x81";
        let err = decode_hdr(&mut &bytes[..]).unwrap_err();
        assert_eq!(err.category(), "Upload");
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn test_checked_len_overflow() {
        assert_eq!(checked_len(4, 2, 3).unwrap(), 24);
        assert!(checked_len(u32::MAX, u32::MAX, 4).is_err());
    }

    #[test]
    fn test_truncated_pixels_are_error() {
        let mut bytes = Vec::new();
        encode_hdr(&mut bytes, &gradient(4, 4), false).unwrap();
        bytes.truncate(bytes.len() - 3);
        assert!(decode_hdr(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn test_to_rgba_adds_alpha() {
        let hdr = HdrImage::new(2, 1, vec![1.0, 0.5, 0.25, 0.75, 1.0, 0.5]).unwrap();
        assert_eq!(hdr.to_rgba(), vec![1.0, 0.5, 0.25, 1.0, 0.75, 1.0, 0.5, 1.0]);
    }
}
