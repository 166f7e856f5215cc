use image::GrayImage;

pub const DEFAULT_LOW_THRESHOLD: f32 = 50.0;
pub const DEFAULT_HIGH_THRESHOLD: f32 = 150.0;

/// Binary edge map (255 on edges) via two-threshold hysteresis.
pub fn extract_edges(gray: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    imageproc::edges::canny(gray, low_threshold, high_threshold)
}
