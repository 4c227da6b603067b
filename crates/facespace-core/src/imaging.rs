//! Image exchange types and the normalization contract.
//!
//! Every image entering the database, for training or for a query, passes
//! through [`normalize`]: color input is reduced to luminance, then the
//! result is resized to the database's fixed face size.

use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Pixel encodings accepted at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Single-channel 8-bit intensity.
    Gray8,
    /// Packed 8-bit R, G, B.
    Rgb24,
}

impl PixelFormat {
    /// Parse an exchange format tag (`"gray8"` or `"rgb24"`).
    pub fn from_tag(tag: &str) -> Result<Self, ImageError> {
        match tag.to_ascii_lowercase().as_str() {
            "gray8" | "grey8" => Ok(Self::Gray8),
            "rgb24" | "rgb" => Ok(Self::Rgb24),
            _ => Err(ImageError::UnsupportedFormat(tag.to_string())),
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Gray8 => "gray8",
            Self::Rgb24 => "rgb24",
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            Self::Gray8 => 1,
            Self::Rgb24 => 3,
        }
    }
}

/// An inbound image in one of the supported encodings.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Wrap a pixel buffer, checking that its length matches the geometry.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self, ImageError> {
        if width == 0 || height == 0 {
            return Err(ImageError::InvalidDimensions { width, height });
        }
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(ImageError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Single-channel image from a grayscale buffer.
    pub fn gray(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ImageError> {
        Self::new(width, height, PixelFormat::Gray8, data)
    }
}

/// A normalized, single-channel face image (row-major, one byte per pixel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl FaceImage {
    /// Number of pixels (the flattened dimension D).
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Average pixel intensity (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.pixels.is_empty() {
            return 0.0;
        }
        self.pixels.iter().map(|&b| b as f32).sum::<f32>() / self.pixels.len() as f32
    }
}

/// Convert packed RGB to luminance: `0.299 R + 0.587 G + 0.114 B`, rounded.
pub fn rgb_to_luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|px| {
            let y = 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Reduce `raw` to a single channel and resize it to `width`×`height`.
///
/// Resampling is bilinear. An image already at the target size is passed
/// through untouched, so a stored sample queried again normalizes to the
/// exact same pixels.
pub fn normalize(raw: &RawImage, width: u32, height: u32) -> Result<FaceImage, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidDimensions { width, height });
    }

    let gray = match raw.format {
        PixelFormat::Gray8 => raw.data.clone(),
        PixelFormat::Rgb24 => rgb_to_luma(&raw.data),
    };

    let expected = raw.width as usize * raw.height as usize;
    if gray.len() != expected {
        return Err(ImageError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }

    if raw.width == width && raw.height == height {
        return Ok(FaceImage {
            width,
            height,
            pixels: gray,
        });
    }

    let src = GrayImage::from_raw(raw.width, raw.height, gray).ok_or(ImageError::InvalidLength {
        expected,
        actual: 0,
    })?;
    let resized = imageops::resize(&src, width, height, FilterType::Triangle);

    tracing::trace!(
        from_width = raw.width,
        from_height = raw.height,
        width,
        height,
        "resized face image"
    );

    Ok(FaceImage {
        width,
        height,
        pixels: resized.into_raw(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid pixel buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },
}
