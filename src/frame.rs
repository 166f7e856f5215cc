//! Frame container.
//!
//! A `Frame` is an immutable 3-channel RGB raster. Construction validates the
//! shape, so every stage downstream can assume a non-empty RGB image.
//!
//! - `Frame::new` wraps an existing `RgbImage`.
//! - `Frame::from_raw` accepts interleaved bytes plus a channel count.
//! - `Frame::decode` / `Frame::encode` bridge to encoded bytes (JPEG, PNG).

use image::{ImageFormat, RgbImage};
use std::io::Cursor;

use crate::error::{DetectError, DetectResult};

/// JPEG is the wire format for annotated frames (upload responses, MJPEG feed).
pub const DEFAULT_ENCODING: ImageFormat = ImageFormat::Jpeg;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    image: RgbImage,
}

impl Frame {
    pub fn new(image: RgbImage) -> DetectResult<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(DetectError::InvalidFrame(format!(
                "frame has zero area ({}x{})",
                image.width(),
                image.height()
            )));
        }
        Ok(Self { image })
    }

    /// Build a frame from interleaved pixel bytes.
    ///
    /// Only 3-channel data is accepted; the length must be exactly
    /// `width * height * 3`.
    pub fn from_raw(width: u32, height: u32, channels: u8, data: Vec<u8>) -> DetectResult<Self> {
        if channels != 3 {
            return Err(DetectError::InvalidFrame(format!(
                "expected 3 channels, got {}",
                channels
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| DetectError::InvalidFrame("frame dimensions overflow".to_string()))?;
        if data.len() != expected {
            return Err(DetectError::InvalidFrame(format!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| DetectError::InvalidFrame("buffer does not fit frame".to_string()))?;
        Self::new(image)
    }

    /// Decode an encoded image (any format enabled on the `image` crate).
    pub fn decode(bytes: &[u8]) -> DetectResult<Self> {
        if bytes.is_empty() {
            return Err(DetectError::InvalidFrame("empty image payload".to_string()));
        }
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| DetectError::InvalidFrame(format!("undecodable image: {}", e)))?;
        Self::new(decoded.to_rgb8())
    }

    pub fn encode(&self, format: ImageFormat) -> DetectResult<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, format)
            .map_err(|e| DetectError::Encoding(format!("{:?}: {}", format, e)))?;
        Ok(buf.into_inner())
    }

    pub fn encode_jpeg(&self) -> DetectResult<Vec<u8>> {
        self.encode(DEFAULT_ENCODING)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl TryFrom<RgbImage> for Frame {
    type Error = DetectError;

    fn try_from(image: RgbImage) -> DetectResult<Self> {
        Frame::new(image)
    }
}
