//! Boosted Haar cascade face detector.
//!
//! Models load from OpenCV cascade XML, either the `opencv-cascade-classifier`
//! layout or the older `opencv-haar-classifier` one.
//! A model serialized as JSON by this crate loads as well:
//!
//! ```json
//! {
//!   "window": [24, 24],
//!   "features": [{ "rects": [[x, y, w, h, weight], ...] }, ...],
//!   "stages": [{
//!     "threshold": -1.2,
//!     "classifiers": [{
//!       "nodes": [{ "feature": 0, "threshold": 0.004, "left": 0, "right": -1 }],
//!       "leaves": [0.03, -0.6]
//!     }]
//!   }]
//! }
//! ```
//!
//! A node child greater than zero is the index of another node; zero or less
//! names leaf `-child`.
//!
//! Detection scans a downscaled image pyramid with the fixed training window,
//! then groups overlapping hits.

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::Path;

use crate::detect::backend::{FaceBackend, FaceParams};
use crate::detect::backends::cascade_xml;
use crate::detect::region::Region;
use crate::error::DetectResult;

/// Similarity tolerance used when grouping raw hits.
const GROUP_EPS: f64 = 0.2;

const MAX_WINDOW: u32 = 1024;

/// Windows whose inner area over `sqrt(area * sq - sum^2)` reaches this are
/// too flat to classify (pixel deviation of 10 or less).
const MIN_CONTRAST: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CascadeModel {
    pub window: [u32; 2],
    pub features: Vec<HaarFeature>,
    pub stages: Vec<CascadeStage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HaarFeature {
    /// `(x, y, width, height, weight)` in window coordinates.
    pub rects: Vec<(u32, u32, u32, u32, f64)>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CascadeStage {
    pub threshold: f64,
    pub classifiers: Vec<WeakClassifier>,
}

/// Decision tree over Haar features. Most models use single-node stumps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeakClassifier {
    pub nodes: Vec<TreeNode>,
    pub leaves: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: usize,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
}

impl WeakClassifier {
    pub fn stump(feature: usize, threshold: f64, left: f64, right: f64) -> Self {
        Self {
            nodes: vec![TreeNode {
                feature,
                threshold,
                left: 0,
                right: -1,
            }],
            leaves: vec![left, right],
        }
    }

    /// Walk from the root: `value < threshold * norm` goes left.
    fn vote(&self, norm: f64, value_of: impl Fn(usize) -> f64) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            let next = if value_of(node.feature) < node.threshold * norm {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return self.leaves[next.unsigned_abs() as usize];
            }
            idx = next as usize;
        }
    }

    fn check(&self, features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(anyhow!("weak classifier has no nodes"));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if node.feature >= features {
                return Err(anyhow!("references missing feature {}", node.feature));
            }
            for child in [node.left, node.right] {
                if child > 0 {
                    // Children come after their parent, so walks terminate.
                    let child = child as usize;
                    if child <= i || child >= self.nodes.len() {
                        return Err(anyhow!("node {} has bad child {}", i, child));
                    }
                } else if child.unsigned_abs() as usize >= self.leaves.len() {
                    return Err(anyhow!("node {} references missing leaf {}", i, -child));
                }
            }
        }
        Ok(())
    }
}

impl CascadeModel {
    pub fn from_json(json: &str) -> Result<Self> {
        let model: CascadeModel = serde_json::from_str(json).context("parse cascade model")?;
        model.validate()?;
        Ok(model)
    }

    /// Parse an OpenCV cascade XML document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let model = cascade_xml::parse(xml)?;
        model.validate()?;
        Ok(model)
    }

    /// Pick the parser from the first non-blank character.
    pub fn parse(text: &str) -> Result<Self> {
        let body = text.trim_start_matches('\u{feff}').trim_start();
        if body.starts_with('<') {
            Self::from_xml(body)
        } else {
            Self::from_json(body)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let [ww, wh] = self.window;
        if ww < 3 || wh < 3 {
            return Err(anyhow!("cascade window must be at least 3x3"));
        }
        if ww > MAX_WINDOW || wh > MAX_WINDOW {
            return Err(anyhow!("cascade window {}x{} is too large", ww, wh));
        }
        if self.stages.is_empty() {
            return Err(anyhow!("cascade has no stages"));
        }
        let outside = |start: u32, len: u32, limit: u32| {
            start.checked_add(len).map_or(true, |end| end > limit)
        };
        for (i, feature) in self.features.iter().enumerate() {
            if feature.rects.is_empty() {
                return Err(anyhow!("feature {} has no rectangles", i));
            }
            for &(x, y, w, h, weight) in &feature.rects {
                if w == 0 || h == 0 || outside(x, w, ww) || outside(y, h, wh) {
                    return Err(anyhow!("feature {} rectangle leaves the window", i));
                }
                if !weight.is_finite() {
                    return Err(anyhow!("feature {} has a non-finite weight", i));
                }
            }
        }
        for (i, stage) in self.stages.iter().enumerate() {
            if stage.classifiers.is_empty() {
                return Err(anyhow!("stage {} has no classifiers", i));
            }
            for (j, classifier) in stage.classifiers.iter().enumerate() {
                classifier
                    .check(self.features.len())
                    .with_context(|| format!("stage {} classifier {}", i, j))?;
            }
        }
        Ok(())
    }
}

/// Summed-area tables for pixel values and their squares.
struct Integral {
    stride: usize,
    sum: Vec<u64>,
    sq: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq = vec![0u64; stride * (h + 1)];
        let raw = img.as_raw();
        for y in 0..h {
            let mut row_sum = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row_sum += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + x + 1;
                sum[idx] = sum[idx - stride] + row_sum;
                sq[idx] = sq[idx - stride] + row_sq;
            }
        }
        Self { stride, sum, sq }
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        table[y1 * stride + x1] + table[y0 * stride + x0]
            - table[y1 * stride + x0]
            - table[y0 * stride + x1]
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq, self.stride, x, y, w, h)
    }
}

pub struct CascadeBackend {
    model: CascadeModel,
}

impl CascadeBackend {
    pub fn new(model: CascadeModel) -> Self {
        Self { model }
    }

    /// Load an OpenCV XML cascade or a JSON model.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read cascade model {}", path.display()))?;
        let model = CascadeModel::parse(&text)
            .with_context(|| format!("load cascade model {}", path.display()))?;
        log::info!(
            "cascade model loaded: {} stages, {} features, window {}x{}",
            model.stages.len(),
            model.features.len(),
            model.window[0],
            model.window[1]
        );
        Ok(Self::new(model))
    }

    pub fn model(&self) -> &CascadeModel {
        &self.model
    }

    fn window_passes(&self, integral: &Integral, x: u32, y: u32) -> bool {
        let [ww, wh] = self.model.window;

        // Contrast normalization over the window minus a 1px border. Feature
        // sums are compared against `threshold * sqrt(inner * sq - sum^2)`.
        let inner = (ww - 2) as f64 * (wh - 2) as f64;
        let s = integral.sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let sq = integral.sq_sum(x + 1, y + 1, ww - 2, wh - 2) as f64;
        let var = inner * sq - s * s;
        if var <= 0.0 {
            return false;
        }
        let norm = var.sqrt();
        if inner / norm >= MIN_CONTRAST {
            return false;
        }

        let feature_value = |idx: usize| -> f64 {
            self.model.features[idx]
                .rects
                .iter()
                .map(|&(rx, ry, rw, rh, weight)| integral.sum(x + rx, y + ry, rw, rh) as f64 * weight)
                .sum()
        };
        self.model.stages.iter().all(|stage| {
            let total: f64 = stage
                .classifiers
                .iter()
                .map(|c| c.vote(norm, &feature_value))
                .sum();
            total >= stage.threshold
        })
    }

    /// Raw window hits across the pyramid, in frame coordinates.
    fn scan(&self, gray: &GrayImage, params: &FaceParams) -> Vec<Region> {
        let [ww, wh] = self.model.window;
        let (img_w, img_h) = gray.dimensions();
        let mut hits = Vec::new();

        let mut scale = 1.0f64;
        loop {
            let level_w = (img_w as f64 / scale).round() as u32;
            let level_h = (img_h as f64 / scale).round() as u32;
            if level_w < ww || level_h < wh {
                break;
            }
            let face_w = (ww as f64 * scale).round() as u32;
            let face_h = (wh as f64 * scale).round() as u32;

            if face_w >= params.min_size && face_h >= params.min_size {
                let level: Cow<'_, GrayImage> = if level_w == img_w && level_h == img_h {
                    Cow::Borrowed(gray)
                } else {
                    Cow::Owned(imageops::resize(gray, level_w, level_h, FilterType::Triangle))
                };
                let integral = Integral::new(&level);
                let step = if scale > 2.0 { 1 } else { 2 };

                for y in (0..=level_h - wh).step_by(step) {
                    for x in (0..=level_w - ww).step_by(step) {
                        if self.window_passes(&integral, x, y) {
                            let fx = ((x as f64 * scale).round() as u32).min(img_w - 1);
                            let fy = ((y as f64 * scale).round() as u32).min(img_h - 1);
                            hits.push(Region::from_box(
                                fx,
                                fy,
                                face_w.min(img_w - fx),
                                face_h.min(img_h - fy),
                            ));
                        }
                    }
                }
            }
            scale *= params.scale_factor;
        }
        hits
    }
}

impl FaceBackend for CascadeBackend {
    fn name(&self) -> &'static str {
        "cascade"
    }

    fn detect_faces(&self, gray: &GrayImage, params: &FaceParams) -> DetectResult<Vec<Region>> {
        let hits = self.scan(gray, params);
        log::debug!("cascade scan: {} raw hits", hits.len());
        Ok(group_regions(&hits, params.min_neighbors))
    }

    fn warm_up(&self) -> DetectResult<()> {
        let [ww, wh] = self.model.window;
        // Flat windows exit before any stage runs, so use a gradient.
        let sample = GrayImage::from_fn(ww, wh, |x, y| {
            image::Luma([x.wrapping_mul(7).wrapping_add(y.wrapping_mul(13)) as u8])
        });
        let integral = Integral::new(&sample);
        let _ = self.window_passes(&integral, 0, 0);
        Ok(())
    }
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS
        * (a.width.min(b.width) as f64 + a.height.min(b.height) as f64)
        * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar boxes, keep clusters with more than `min_neighbors`
/// members, average each, then drop averaged boxes nested inside a
/// better-supported one.
pub fn group_regions(hits: &[Region], min_neighbors: u32) -> Vec<Region> {
    let n = hits.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // Accumulate per cluster, in order of first appearance.
    let mut order: Vec<usize> = Vec::new();
    let mut totals: Vec<[f64; 4]> = vec![[0.0; 4]; n];
    let mut counts: Vec<u32> = vec![0; n];
    for (i, hit) in hits.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if counts[root] == 0 {
            order.push(root);
        }
        counts[root] += 1;
        let t = &mut totals[root];
        t[0] += hit.x as f64;
        t[1] += hit.y as f64;
        t[2] += hit.width as f64;
        t[3] += hit.height as f64;
    }

    let clusters: Vec<(Region, u32)> = order
        .into_iter()
        .filter(|&root| counts[root] > min_neighbors)
        .map(|root| {
            let c = counts[root] as f64;
            let t = totals[root];
            let region = Region::from_box(
                (t[0] / c).round() as u32,
                (t[1] / c).round() as u32,
                (t[2] / c).round() as u32,
                (t[3] / c).round() as u32,
            );
            (region, counts[root])
        })
        .collect();

    clusters
        .iter()
        .enumerate()
        .filter(|(i, (r1, n1))| {
            !clusters.iter().enumerate().any(|(j, (r2, n2))| {
                if *i == j {
                    return false;
                }
                let dx = (r2.width as f64 * GROUP_EPS).round() as i64;
                let dy = (r2.height as f64 * GROUP_EPS).round() as i64;
                let inside = r1.x as i64 >= r2.x as i64 - dx
                    && r1.y as i64 >= r2.y as i64 - dy
                    && r1.right() as i64 <= r2.right() as i64 + dx
                    && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
                inside && r1 != r2 && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}
