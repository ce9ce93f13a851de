use std::io::Cursor;
use std::time::Instant;

use bytes::Bytes;
use image::{GenericImageView, ImageReader, Limits, RgbaImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::MAX_IMAGE_DIMENSION;

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("input bytes empty")]
    EmptyInput,

    #[error("input too large: {size} bytes, max {max_size}")]
    InputTooLarge { size: usize, max_size: usize },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image too large: {width}x{height} exceeds {max}x{max}")]
    DimensionsTooLarge { width: u32, height: u32, max: u32 },

    #[error("invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("failed to decode image: {reason}")]
    Malformed { reason: String },

    #[error("decode worker stopped before finishing")]
    WorkerStopped,
}

impl From<image::ImageError> for DecodeError {
    fn from(e: image::ImageError) -> Self {
        match e {
            image::ImageError::Unsupported(_) => DecodeError::UnsupportedFormat,
            other => DecodeError::Malformed {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct DecodeLimits {
    pub max_input_bytes: usize,
    pub max_dimension: u32,
    pub max_alloc_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_input_bytes: crate::MAX_UPLOAD_BYTES,
            max_dimension: MAX_IMAGE_DIMENSION,
            max_alloc_bytes: 512 * 1024 * 1024,
        }
    }
}

/// A decoded raster together with its natural size.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RasterParts", try_from = "RasterParts")]
pub struct DecodedImage {
    raster: RgbaImage,
}

/// Wire form of a [`DecodedImage`]: natural size plus packed RGBA8 pixels.
#[derive(Serialize, Deserialize)]
struct RasterParts {
    width: u32,
    height: u32,
    rgba: Vec<u8>,
}

impl From<DecodedImage> for RasterParts {
    fn from(image: DecodedImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            rgba: image.raster.into_raw(),
        }
    }
}

impl TryFrom<RasterParts> for DecodedImage {
    type Error = DecodeError;

    fn try_from(parts: RasterParts) -> Result<Self, Self::Error> {
        let RasterParts { width, height, rgba } = parts;
        RgbaImage::from_raw(width, height, rgba)
            .map(Self::new)
            .ok_or(DecodeError::InvalidDimensions { width, height })
    }
}

impl DecodedImage {
    pub fn new(raster: RgbaImage) -> Self {
        Self { raster }
    }

    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.raster.dimensions()
    }

    pub fn raster(&self) -> &RgbaImage {
        &self.raster
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

#[instrument(skip(raw_bytes, limits), fields(input_size = raw_bytes.len()))]
pub fn decode_image(raw_bytes: &[u8], limits: &DecodeLimits) -> Result<DecodedImage, DecodeError> {
    if raw_bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    if raw_bytes.len() > limits.max_input_bytes {
        return Err(DecodeError::InputTooLarge {
            size: raw_bytes.len(),
            max_size: limits.max_input_bytes,
        });
    }

    let sniffed = ImageReader::new(Cursor::new(raw_bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })?;

    if sniffed.format().is_none() {
        return Err(DecodeError::UnsupportedFormat);
    }

    let (width, height) = sniffed.into_dimensions()?;

    if width == 0 || height == 0 {
        return Err(DecodeError::InvalidDimensions { width, height });
    }
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(DecodeError::DimensionsTooLarge {
            width,
            height,
            max: limits.max_dimension,
        });
    }

    let mut image_limits = Limits::default();
    image_limits.max_image_width = Some(limits.max_dimension);
    image_limits.max_image_height = Some(limits.max_dimension);
    image_limits.max_alloc = Some(limits.max_alloc_bytes);

    let mut reader = ImageReader::new(Cursor::new(raw_bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::Malformed {
            reason: e.to_string(),
        })?;
    reader.limits(image_limits);

    let img = reader.decode()?;
    let (w, h) = img.dimensions();
    debug!(width = w, height = h, "image decoded");

    Ok(DecodedImage::new(img.to_rgba8()))
}

/// Decodes on the blocking pool so the event loop stays responsive.
pub async fn decode_image_async(
    raw_bytes: Bytes,
    limits: DecodeLimits,
) -> Result<DecodedImage, DecodeError> {
    let start = Instant::now();
    let result = tokio::task::spawn_blocking(move || decode_image(&raw_bytes, &limits))
        .await
        .map_err(|_| DecodeError::WorkerStopped)?;

    match &result {
        Ok(img) => debug!(
            width = img.width(),
            height = img.height(),
            elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "decode finished"
        ),
        Err(e) => warn!(error = %e, "decode failed"),
    }

    result
}
