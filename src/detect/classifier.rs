use image::GrayImage;

use crate::detect::color::{self, HsvImage};
use crate::detect::result::{Detection, Label};
use crate::error::DetectResult;
use crate::frame::Frame;

/// Per-pass views of a frame, computed once and shared by every classifier.
pub struct FrameContext<'a> {
    pub frame: &'a Frame,
    pub gray: GrayImage,
    pub hsv: HsvImage,
}

impl<'a> FrameContext<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        Self {
            frame,
            gray: color::to_gray(frame),
            hsv: color::to_hsv(frame),
        }
    }

    pub fn width(&self) -> u32 {
        self.frame.width()
    }

    pub fn height(&self) -> u32 {
        self.frame.height()
    }
}

/// One labelled heuristic.
///
/// `prior` holds the detections of classifiers that ran earlier in the same
/// pass; only dependent classifiers (masks on faces) read it. Implementations
/// must not fail on a well-formed frame, except with `ClassifierUnavailable`.
pub trait Classifier: Send + Sync {
    fn label(&self) -> Label;

    fn classify(&self, ctx: &FrameContext<'_>, prior: &[Detection]) -> DetectResult<Vec<Detection>>;
}
