//! Region extraction from binary masks.
//!
//! Regions are the external outer borders of foreground blobs, reported in the
//! raster order in which the border follower discovers them. Blobs nested
//! inside holes of another blob are not reported.

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::distance_transform::Norm;
use imageproc::point::Point;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box plus the area enclosed by the region's boundary.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: f64,
}

impl Region {
    /// Region whose area is the full box area.
    pub fn from_box(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            area: width as f64 * height as f64,
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn as_xywh(&self) -> [u32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Find external regions whose area lies in `[min_area, max_area]`.
pub fn extract_regions(mask: &GrayImage, min_area: f64, max_area: f64) -> Vec<Region> {
    find_contours::<i32>(mask)
        .iter()
        .filter(|contour| is_external(contour))
        .filter_map(region_from_contour)
        .filter(|region| region.area >= min_area && region.area <= max_area)
        .collect()
}

fn is_external(contour: &Contour<i32>) -> bool {
    contour.border_type == BorderType::Outer && contour.parent.is_none()
}

fn region_from_contour(contour: &Contour<i32>) -> Option<Region> {
    let first = contour.points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &contour.points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(Region {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
        area: polygon_area(&contour.points),
    })
}

/// Shoelace area of a closed point chain.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    twice.abs() as f64 / 2.0
}

/// Morphological open (erode, then dilate) with a square kernel of side `kernel`.
pub fn open(mask: &GrayImage, kernel: u32) -> GrayImage {
    imageproc::morphology::open(mask, Norm::LInf, kernel_radius(kernel))
}

/// Morphological close (dilate, then erode) with a square kernel of side `kernel`.
pub fn close(mask: &GrayImage, kernel: u32) -> GrayImage {
    imageproc::morphology::close(mask, Norm::LInf, kernel_radius(kernel))
}

/// Square kernels are centred, so an even side rounds up to the next odd one.
fn kernel_radius(kernel: u32) -> u8 {
    (kernel / 2).min(u8::MAX as u32) as u8
}

/// Mask cleanup applied before extraction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MorphStep {
    Open(u32),
    Close(u32),
}

pub fn prepare_mask(mask: GrayImage, steps: &[MorphStep]) -> GrayImage {
    steps.iter().fold(mask, |m, step| match *step {
        MorphStep::Open(k) => open(&m, k),
        MorphStep::Close(k) => close(&m, k),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn mask_with_rect(w: u32, h: u32, rx: u32, ry: u32, rw: u32, rh: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if x >= rx && x < rx + rw && y >= ry && y < ry + rh {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }

    #[test]
    fn empty_mask_has_no_regions() {
        let mask = GrayImage::new(64, 48);
        assert!(extract_regions(&mask, 0.0, f64::INFINITY).is_empty());
    }

    #[test]
    fn single_rectangle_yields_matching_box() {
        let mask = mask_with_rect(100, 80, 12, 20, 30, 25);
        let regions = extract_regions(&mask, 100.0, f64::INFINITY);
        assert_eq!(regions.len(), 1);
        let r = regions[0];
        assert_eq!((r.x, r.y, r.width, r.height), (12, 20, 30, 25));
        assert_eq!(r.area, 29.0 * 24.0);
    }

    #[test]
    fn area_bounds_filter_regions() {
        let mut mask = mask_with_rect(100, 100, 5, 5, 10, 10);
        for y in 50..90 {
            for x in 50..90 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let small_only = extract_regions(&mask, 0.0, 200.0);
        assert_eq!(small_only.len(), 1);
        assert_eq!(small_only[0].x, 5);

        let large_only = extract_regions(&mask, 200.0, f64::INFINITY);
        assert_eq!(large_only.len(), 1);
        assert_eq!(large_only[0].x, 50);
    }

    #[test]
    fn nested_blobs_are_not_reported() {
        // Ring with an island in its hole.
        let mut mask = mask_with_rect(60, 60, 5, 5, 50, 50);
        for y in 10..50 {
            for x in 10..50 {
                mask.put_pixel(x, y, Luma([0]));
            }
        }
        for y in 25..35 {
            for x in 25..35 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let regions = extract_regions(&mask, 0.0, f64::INFINITY);
        assert_eq!(regions.len(), 1);
        assert_eq!((regions[0].x, regions[0].y), (5, 5));
    }

    #[test]
    fn open_removes_speckle() {
        let mut mask = mask_with_rect(40, 40, 10, 10, 12, 12);
        mask.put_pixel(2, 2, Luma([255]));
        let cleaned = open(&mask, 5);
        assert_eq!(cleaned.get_pixel(2, 2).0[0], 0);
        assert_eq!(cleaned.get_pixel(15, 15).0[0], 255);
    }

    #[test]
    fn close_fills_small_gaps() {
        let mut mask = mask_with_rect(40, 40, 10, 10, 20, 20);
        mask.put_pixel(20, 20, Luma([0]));
        let filled = prepare_mask(mask, &[MorphStep::Close(3)]);
        assert_eq!(filled.get_pixel(20, 20).0[0], 255);
    }

    #[test]
    fn aspect_ratio_is_width_over_height() {
        let r = Region::from_box(0, 0, 30, 60);
        assert_eq!(r.aspect_ratio(), 0.5);
        assert_eq!(r.area, 1800.0);
    }
}
