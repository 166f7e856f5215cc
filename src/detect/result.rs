use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detect::region::Region;
use crate::error::DetectResult;
use crate::frame::Frame;

/// Labels the pipeline can produce, in classifier invocation order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Face,
    Helmet,
    Phone,
    Mask,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Face, Label::Helmet, Label::Phone, Label::Mask];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Face => "face",
            Label::Helmet => "helmet",
            Label::Phone => "phone",
            Label::Mask => "mask",
        }
    }

    /// Capitalized form drawn on annotated frames.
    pub fn title(&self) -> &'static str {
        match self {
            Label::Face => "Face",
            Label::Helmet => "Helmet",
            Label::Phone => "Phone",
            Label::Mask => "Mask",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: Label,
    /// Fixed per heuristic; not derived from signal strength.
    pub score: f32,
    pub region: Region,
}

impl Detection {
    pub fn new(label: Label, score: f32, region: Region) -> Self {
        Self {
            label,
            score,
            region,
        }
    }
}

/// Result of one detection pass.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    pub detections: Vec<Detection>,
    pub annotated: Frame,
}

impl DetectionResult {
    pub fn count(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn labels(&self) -> Vec<Label> {
        self.detections.iter().map(|d| d.label).collect()
    }

    pub fn of_label(&self, label: Label) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(move |d| d.label == label)
    }

    pub fn report(&self) -> DetectionReport {
        DetectionReport::from_detections(&self.detections)
    }

    pub fn annotated_jpeg(&self) -> DetectResult<Vec<u8>> {
        self.annotated.encode_jpeg()
    }
}

/// Wire form of a detection pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub objects_detected: Vec<String>,
    pub confidence_scores: Vec<f32>,
    pub detection_count: usize,
    /// `[x, y, width, height]` per detection.
    pub boxes: Vec<[u32; 4]>,
}

impl DetectionReport {
    pub fn from_detections(detections: &[Detection]) -> Self {
        Self {
            objects_detected: detections
                .iter()
                .map(|d| d.label.as_str().to_string())
                .collect(),
            confidence_scores: detections.iter().map(|d| d.score).collect(),
            detection_count: detections.len(),
            boxes: detections.iter().map(|d| d.region.as_xywh()).collect(),
        }
    }
}
