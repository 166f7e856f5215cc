//! Tuning knobs for the detection pipeline.
//!
//! Every section deserializes with defaults, so a config file only needs the
//! values it changes. `DetectorConfig::validate` runs once at startup.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::detect::color::HsvRange;

pub const DEFAULT_CASCADE_PATH: &str = "models/haarcascade_frontalface_default.xml";

/// Numeric interval used for areas and aspect ratios.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains_inclusive(&self, value: f64) -> bool {
        self.min <= value && value <= self.max
    }

    pub fn contains_exclusive(&self, value: f64) -> bool {
        self.min < value && value < self.max
    }

    fn check(&self, what: &str) -> Result<()> {
        if !(self.min.is_finite() && self.max.is_finite()) || self.min < 0.0 {
            return Err(anyhow!("{} bounds must be finite and non-negative", what));
        }
        if self.min >= self.max {
            return Err(anyhow!(
                "{} bounds are inverted ({} >= {})",
                what,
                self.min,
                self.max
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceBackendKind {
    #[default]
    Cascade,
    Stub,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhoneStrategy {
    #[default]
    Darkblob,
    Edge,
}

impl std::str::FromStr for PhoneStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "darkblob" => Ok(PhoneStrategy::Darkblob),
            "edge" => Ok(PhoneStrategy::Edge),
            other => Err(anyhow!("unknown phone strategy '{}' (darkblob|edge)", other)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaceSettings {
    pub backend: FaceBackendKind,
    pub cascade_path: PathBuf,
    /// Pyramid step between scan scales.
    pub scale_factor: f64,
    pub min_neighbors: u32,
    /// Smallest face side in pixels.
    pub min_size: u32,
    /// Boxes returned by the stub backend, `[x, y, width, height]`.
    pub stub_faces: Vec<[u32; 4]>,
    pub score: f32,
}

impl Default for FaceSettings {
    fn default() -> Self {
        Self {
            backend: FaceBackendKind::Cascade,
            cascade_path: PathBuf::from(DEFAULT_CASCADE_PATH),
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
            stub_faces: Vec::new(),
            score: 0.95,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HelmetSettings {
    pub hsv: HsvRange,
    pub open_kernel: u32,
    pub close_kernel: u32,
    /// Regions must be strictly larger than this.
    pub min_area: f64,
    pub aspect: Bounds,
    /// Top edge must sit above this fraction of the frame height.
    pub max_top_fraction: f64,
    pub score: f32,
}

impl Default for HelmetSettings {
    fn default() -> Self {
        Self {
            hsv: HsvRange::new([15, 100, 100], [35, 255, 255]),
            open_kernel: 5,
            close_kernel: 10,
            min_area: 1000.0,
            aspect: Bounds::new(0.7, 1.5),
            max_top_fraction: 0.6,
            score: 0.82,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhoneSettings {
    pub strategy: PhoneStrategy,
    pub dark_hsv: HsvRange,
    pub dark_kernel: u32,
    pub dark_area: Bounds,
    pub dark_aspect: Bounds,
    pub dark_score: f32,
    pub edge_low: f32,
    pub edge_high: f32,
    pub edge_area: Bounds,
    /// Portrait and landscape ratio bands.
    pub edge_aspects: Vec<Bounds>,
    pub edge_score: f32,
}

impl Default for PhoneSettings {
    fn default() -> Self {
        Self {
            strategy: PhoneStrategy::Darkblob,
            dark_hsv: HsvRange::new([0, 0, 0], [180, 255, 50]),
            dark_kernel: 3,
            dark_area: Bounds::new(1000.0, 10000.0),
            dark_aspect: Bounds::new(0.4, 0.8),
            dark_score: 0.78,
            edge_low: 50.0,
            edge_high: 150.0,
            edge_area: Bounds::new(500.0, 5000.0),
            edge_aspects: vec![Bounds::new(0.4, 0.8), Bounds::new(1.2, 2.5)],
            edge_score: 0.85,
        }
    }
}

impl PhoneSettings {
    pub fn score(&self) -> f32 {
        match self.strategy {
            PhoneStrategy::Darkblob => self.dark_score,
            PhoneStrategy::Edge => self.edge_score,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskSettings {
    /// Sub-region starts this far down the face box.
    pub offset_fraction: f64,
    pub height_fraction: f64,
    pub blue: HsvRange,
    pub white: HsvRange,
    /// Accept when the covered fraction exceeds this.
    pub color_fraction: f64,
    pub score: f32,
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            offset_fraction: 0.5,
            height_fraction: 0.4,
            blue: HsvRange::new([100, 50, 50], [130, 255, 255]),
            white: HsvRange::new([0, 0, 200], [180, 30, 255]),
            color_fraction: 0.3,
            score: 0.85,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateSettings {
    /// TrueType font for label text; label tabs are drawn without one.
    pub font_path: Option<PathBuf>,
    pub thickness: u32,
    pub text_scale: f32,
}

impl Default for AnnotateSettings {
    fn default() -> Self {
        Self {
            font_path: None,
            thickness: 2,
            text_scale: 18.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub face: FaceSettings,
    pub helmet: HelmetSettings,
    pub phone: PhoneSettings,
    pub mask: MaskSettings,
    pub annotate: AnnotateSettings,
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        let face = &self.face;
        if !(face.scale_factor > 1.0 && face.scale_factor.is_finite()) {
            return Err(anyhow!("face.scale_factor must be greater than 1"));
        }
        if face.min_size == 0 {
            return Err(anyhow!("face.min_size must be greater than zero"));
        }
        check_score("face.score", face.score)?;

        let helmet = &self.helmet;
        check_hsv("helmet.hsv", &helmet.hsv)?;
        check_kernel("helmet.open_kernel", helmet.open_kernel)?;
        check_kernel("helmet.close_kernel", helmet.close_kernel)?;
        if helmet.min_area < 0.0 {
            return Err(anyhow!("helmet.min_area must be non-negative"));
        }
        helmet.aspect.check("helmet.aspect")?;
        check_fraction("helmet.max_top_fraction", helmet.max_top_fraction)?;
        check_score("helmet.score", helmet.score)?;

        let phone = &self.phone;
        check_hsv("phone.dark_hsv", &phone.dark_hsv)?;
        check_kernel("phone.dark_kernel", phone.dark_kernel)?;
        phone.dark_area.check("phone.dark_area")?;
        phone.dark_aspect.check("phone.dark_aspect")?;
        phone.edge_area.check("phone.edge_area")?;
        if phone.edge_aspects.is_empty() {
            return Err(anyhow!("phone.edge_aspects must not be empty"));
        }
        for band in &phone.edge_aspects {
            band.check("phone.edge_aspects")?;
        }
        if !(phone.edge_low > 0.0 && phone.edge_low <= phone.edge_high) {
            return Err(anyhow!("phone edge thresholds must satisfy 0 < low <= high"));
        }
        check_score("phone.dark_score", phone.dark_score)?;
        check_score("phone.edge_score", phone.edge_score)?;

        let mask = &self.mask;
        check_hsv("mask.blue", &mask.blue)?;
        check_hsv("mask.white", &mask.white)?;
        check_fraction("mask.offset_fraction", mask.offset_fraction)?;
        check_fraction("mask.height_fraction", mask.height_fraction)?;
        check_fraction("mask.color_fraction", mask.color_fraction)?;
        check_score("mask.score", mask.score)?;

        if self.annotate.thickness == 0 {
            return Err(anyhow!("annotate.thickness must be greater than zero"));
        }
        if !(self.annotate.text_scale > 0.0) {
            return Err(anyhow!("annotate.text_scale must be positive"));
        }
        Ok(())
    }
}

fn check_hsv(what: &str, range: &HsvRange) -> Result<()> {
    if !range.is_ordered() {
        return Err(anyhow!("{} lower bound exceeds upper bound", what));
    }
    Ok(())
}

fn check_kernel(what: &str, kernel: u32) -> Result<()> {
    if kernel == 0 || kernel > 511 {
        return Err(anyhow!("{} must be in 1..=511", what));
    }
    Ok(())
}

fn check_fraction(what: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(anyhow!("{} must be in (0, 1]", what));
    }
    Ok(())
}

fn check_score(what: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must be in [0, 1]", what));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DetectorConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_ranges() {
        let mut cfg = DetectorConfig::default();
        cfg.helmet.hsv = HsvRange::new([40, 100, 100], [35, 255, 255]);
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::default();
        cfg.phone.dark_area = Bounds::new(5000.0, 1000.0);
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::default();
        cfg.face.scale_factor = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = DetectorConfig::default();
        cfg.mask.color_fraction = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg: DetectorConfig =
            serde_json::from_str(r#"{"phone": {"strategy": "edge"}, "face": {"min_neighbors": 3}}"#)
                .unwrap();
        assert_eq!(cfg.phone.strategy, PhoneStrategy::Edge);
        assert_eq!(cfg.phone.score(), 0.85);
        assert_eq!(cfg.face.min_neighbors, 3);
        assert_eq!(cfg.face.scale_factor, 1.1);
        assert_eq!(cfg.helmet, HelmetSettings::default());
    }

    #[test]
    fn bounds_inclusivity() {
        let b = Bounds::new(0.4, 0.8);
        assert!(b.contains_inclusive(0.4));
        assert!(!b.contains_exclusive(0.4));
        assert!(b.contains_exclusive(0.5));
    }
}
