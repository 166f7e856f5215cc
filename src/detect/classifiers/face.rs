use crate::detect::backend::{FaceBackend, FaceParams};
use crate::detect::classifier::{Classifier, FrameContext};
use crate::detect::config::FaceSettings;
use crate::detect::result::{Detection, Label};
use crate::error::DetectResult;

/// Faces from a pluggable backend; scores are a fixed constant.
pub struct FaceClassifier {
    backend: Box<dyn FaceBackend>,
    params: FaceParams,
    score: f32,
}

impl FaceClassifier {
    pub fn new(backend: Box<dyn FaceBackend>, settings: &FaceSettings) -> Self {
        Self {
            backend,
            params: FaceParams::from(settings),
            score: settings.score,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

impl Classifier for FaceClassifier {
    fn label(&self) -> Label {
        Label::Face
    }

    fn classify(&self, ctx: &FrameContext<'_>, _prior: &[Detection]) -> DetectResult<Vec<Detection>> {
        let faces = self.backend.detect_faces(&ctx.gray, &self.params)?;
        Ok(faces
            .into_iter()
            .map(|region| Detection::new(Label::Face, self.score, region))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{StubBackend, UnavailableBackend};
    use crate::frame::Frame;
    use image::{Rgb, RgbImage};

    #[test]
    fn wraps_backend_boxes() {
        let classifier = FaceClassifier::new(
            Box::new(StubBackend::with_faces(vec![[5, 6, 20, 22]])),
            &FaceSettings::default(),
        );
        let frame = Frame::new(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]))).unwrap();
        let out = classifier.classify(&FrameContext::new(&frame), &[]).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, Label::Face);
        assert_eq!(out[0].score, 0.95);
        assert_eq!(out[0].region.as_xywh(), [5, 6, 20, 22]);
    }

    #[test]
    fn unavailable_backend_propagates() {
        let classifier = FaceClassifier::new(
            Box::new(UnavailableBackend::new("no model")),
            &FaceSettings::default(),
        );
        let frame = Frame::new(RgbImage::new(8, 8)).unwrap();
        let err = classifier.classify(&FrameContext::new(&frame), &[]).unwrap_err();
        assert!(err.is_recoverable());
    }
}
