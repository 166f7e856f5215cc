//! Color-space normalization.
//!
//! HSV values use the 8-bit convention common to classic vision tooling:
//! hue is halved to fit a byte (`0..180`), saturation and value span `0..=255`.
//! Thresholds in configuration are written in that space.

use image::{GrayImage, ImageBuffer, Luma, Rgb};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Image whose three channels hold hue, saturation and value.
pub type HsvImage = ImageBuffer<Rgb<u8>, Vec<u8>>;

pub fn to_gray(frame: &Frame) -> GrayImage {
    image::imageops::grayscale(frame.image())
}

pub fn to_hsv(frame: &Frame) -> HsvImage {
    let src = frame.image();
    let mut out = HsvImage::new(src.width(), src.height());
    for (dst, px) in out.pixels_mut().zip(src.pixels()) {
        *dst = Rgb(rgb_to_hsv(px.0));
    }
    out
}

/// Convert a single RGB triple to 8-bit HSV.
pub fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (rf, gf, bf) = (r as f32, g as f32, b as f32);
    let v = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let diff = v - min;

    let s = if v > 0.0 { 255.0 * diff / v } else { 0.0 };

    let mut h = if diff == 0.0 {
        0.0
    } else if v == rf {
        60.0 * (gf - bf) / diff
    } else if v == gf {
        120.0 + 60.0 * (bf - rf) / diff
    } else {
        240.0 + 60.0 * (rf - gf) / diff
    };
    if h < 0.0 {
        h += 360.0;
    }

    let hue = (h / 2.0).round() as u32 % 180;
    [hue as u8, clamp_to_u8(s), clamp_to_u8(v)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Inclusive HSV box: `lower[c] <= px[c] <= upper[c]` for every channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvRange {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    pub fn contains(&self, hsv: [u8; 3]) -> bool {
        (0..3).all(|c| self.lower[c] <= hsv[c] && hsv[c] <= self.upper[c])
    }

    pub fn is_ordered(&self) -> bool {
        (0..3).all(|c| self.lower[c] <= self.upper[c])
    }
}

/// Binary mask of pixels inside `range` (255) or outside (0).
pub fn in_range(hsv: &HsvImage, range: &HsvRange) -> GrayImage {
    let mut mask = GrayImage::new(hsv.width(), hsv.height());
    for (dst, px) in mask.pixels_mut().zip(hsv.pixels()) {
        if range.contains(px.0) {
            *dst = Luma([255]);
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn primary_colors_map_to_expected_hues() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([255, 213, 0]), [25, 255, 255]);
    }

    #[test]
    fn grays_have_no_saturation() {
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
        assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
    }

    #[test]
    fn in_range_is_inclusive() {
        let frame = Frame::new(RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 213, 0]),
            1 => Rgb([255, 0, 0]),
            _ => Rgb([0, 0, 0]),
        }))
        .unwrap();
        let hsv = to_hsv(&frame);
        let mask = in_range(&hsv, &HsvRange::new([25, 255, 255], [35, 255, 255]));
        assert_eq!(mask.as_raw(), &vec![255, 0, 0]);
    }

    #[test]
    fn gray_conversion_keeps_dimensions() {
        let frame = Frame::new(RgbImage::from_pixel(7, 5, Rgb([40, 40, 40]))).unwrap();
        let gray = to_gray(&frame);
        assert_eq!(gray.dimensions(), (7, 5));
        assert!(gray.pixels().all(|p| p.0[0] == 40));
    }
}
