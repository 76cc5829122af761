//! Image input and netpbm decoding.
//!
//! The built-in feature drivers read netpbm images: PGM (`P2`, `P5`) and
//! PPM (`P3`, `P6`), with any maxval up to 65535. Samples are rescaled to
//! 8 bits and grayscale is expanded to RGB.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::feature::FeatureVector;

/// An image given to the database: raw bytes, a file path, or a
/// precomputed feature vector.
///
/// Every call site that takes an image accepts all three forms.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Encoded image bytes.
    Bytes(Vec<u8>),
    /// Path to an encoded image file.
    File(PathBuf),
    /// A feature vector extracted earlier.
    Feature(FeatureVector),
}

impl ImageSource {
    /// Short description used in error messages and logs.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes(b) => format!("<{} bytes>", b.len()),
            ImageSource::File(p) => p.display().to_string(),
            ImageSource::Feature(f) => format!("<feature {}>", f.tag()),
        }
    }

    /// The path recorded as `source_ref` for file inputs.
    pub fn source_ref(&self) -> Option<String> {
        match self {
            ImageSource::File(p) => Some(p.display().to_string()),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl From<&[u8]> for ImageSource {
    fn from(bytes: &[u8]) -> Self {
        ImageSource::Bytes(bytes.to_vec())
    }
}

impl From<&Vec<u8>> for ImageSource {
    fn from(bytes: &Vec<u8>) -> Self {
        ImageSource::Bytes(bytes.clone())
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::File(path)
    }
}

impl From<&Path> for ImageSource {
    fn from(path: &Path) -> Self {
        ImageSource::File(path.to_path_buf())
    }
}

impl From<&PathBuf> for ImageSource {
    fn from(path: &PathBuf) -> Self {
        ImageSource::File(path.clone())
    }
}

impl From<&str> for ImageSource {
    fn from(path: &str) -> Self {
        ImageSource::File(PathBuf::from(path))
    }
}

impl From<String> for ImageSource {
    fn from(path: String) -> Self {
        ImageSource::File(PathBuf::from(path))
    }
}

impl From<FeatureVector> for ImageSource {
    fn from(feature: FeatureVector) -> Self {
        ImageSource::Feature(feature)
    }
}

impl From<&FeatureVector> for ImageSource {
    fn from(feature: &FeatureVector) -> Self {
        ImageSource::Feature(feature.clone())
    }
}

/// A decoded 8-bit RGB image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<[u8; 3]>,
}

impl Image {
    /// Creates an image from row-major RGB pixels.
    pub fn from_pixels(width: usize, height: usize, pixels: Vec<[u8; 3]>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidArgument("image has no pixels".to_string()));
        }
        if pixels.len() != width * height {
            return Err(Error::InvalidArgument(format!(
                "expected {} pixels for {}x{}, got {}",
                width * height,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[[u8; 3]] {
        &self.pixels
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        self.pixels[y * self.width + x]
    }

    /// Decodes a netpbm image. `input` names the source in errors.
    pub fn decode(bytes: &[u8], input: &str) -> Result<Self> {
        decode_pnm(bytes).map_err(|reason| Error::extraction(input, reason))
    }

    /// Reads and decodes a netpbm file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let input = path.display().to_string();
        let bytes = fs::read(path).map_err(|e| Error::extraction(&input, e.to_string()))?;
        if bytes.is_empty() {
            return Err(Error::extraction(&input, "file is empty"));
        }
        Self::decode(&bytes, &input)
    }
}

/// Luminance (BT.601) of an RGB pixel, 0..=255.
#[inline]
pub fn luma([r, g, b]: [u8; 3]) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn number(&mut self, what: &str) -> std::result::Result<u32, String> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(format!("expected {}", what));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| format!("{} out of range", what))
    }
}

fn decode_pnm(bytes: &[u8]) -> std::result::Result<Image, String> {
    if bytes.len() < 2 || bytes[0] != b'P' {
        return Err("not a netpbm image".to_string());
    }
    let magic = bytes[1];
    if !matches!(magic, b'2' | b'3' | b'5' | b'6') {
        return Err(format!("unsupported netpbm format P{}", magic as char));
    }

    let mut cur = Cursor { bytes, pos: 2 };
    let width = cur.number("width")? as usize;
    let height = cur.number("height")? as usize;
    let maxval = cur.number("maxval")?;
    if width == 0 || height == 0 {
        return Err("image has no pixels".to_string());
    }
    if maxval == 0 || maxval > 65535 {
        return Err(format!("invalid maxval {}", maxval));
    }
    let channels = if matches!(magic, b'3' | b'6') { 3 } else { 1 };
    let samples = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(channels))
        .ok_or_else(|| "image dimensions overflow".to_string())?;

    let raw = if matches!(magic, b'5' | b'6') {
        // Exactly one whitespace byte separates the header from the raster.
        match bytes.get(cur.pos) {
            Some(b) if b.is_ascii_whitespace() => cur.pos += 1,
            _ => return Err("missing raster separator".to_string()),
        }
        read_binary(&bytes[cur.pos..], samples, maxval)?
    } else {
        // Each ASCII sample is at least one digit and a separator.
        let remaining = bytes.len() - cur.pos;
        if samples > (remaining + 1) / 2 {
            return Err(format!(
                "truncated raster: {} samples cannot fit in {} bytes",
                samples, remaining
            ));
        }
        let mut out = Vec::with_capacity(samples);
        for _ in 0..samples {
            let v = cur.number("sample").map_err(|_| "truncated raster".to_string())?;
            if v > maxval {
                return Err(format!("sample {} exceeds maxval {}", v, maxval));
            }
            out.push(v);
        }
        out
    };

    let scale = |v: u32| ((v * 255 + maxval / 2) / maxval) as u8;
    let pixels = if channels == 3 {
        raw.chunks_exact(3)
            .map(|c| [scale(c[0]), scale(c[1]), scale(c[2])])
            .collect()
    } else {
        raw.iter()
            .map(|&v| {
                let g = scale(v);
                [g, g, g]
            })
            .collect()
    };

    Ok(Image {
        width,
        height,
        pixels,
    })
}

fn read_binary(raster: &[u8], samples: usize, maxval: u32) -> std::result::Result<Vec<u32>, String> {
    let wide = maxval > 255;
    let needed = if wide { samples * 2 } else { samples };
    if raster.len() < needed {
        return Err(format!(
            "truncated raster: expected {} bytes, found {}",
            needed,
            raster.len()
        ));
    }
    let values: Vec<u32> = if wide {
        raster[..needed]
            .chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]) as u32)
            .collect()
    } else {
        raster[..needed].iter().map(|&b| b as u32).collect()
    };
    if let Some(v) = values.iter().find(|&&v| v > maxval) {
        return Err(format!("sample {} exceeds maxval {}", v, maxval));
    }
    Ok(values)
}

/// Encodes RGB pixels as a binary PPM (`P6`). Used by tests and demos to
/// produce inputs.
pub fn encode_ppm(width: usize, height: usize, pixels: &[[u8; 3]]) -> Vec<u8> {
    let mut out = format!("P6\n{} {}\n255\n", width, height).into_bytes();
    out.reserve(pixels.len() * 3);
    for p in pixels {
        out.extend_from_slice(p);
    }
    out
}
