use anyhow::Result;

use crate::detect::annotate::Annotator;
use crate::detect::backends::select_face_backend;
use crate::detect::classifier::{Classifier, FrameContext};
use crate::detect::classifiers::{FaceClassifier, HelmetClassifier, MaskClassifier, PhoneClassifier};
use crate::detect::config::DetectorConfig;
use crate::detect::result::{Detection, DetectionResult};
use crate::error::DetectResult;
use crate::frame::Frame;

/// Runs the classifiers in order over one frame and annotates the result.
///
/// Output order is classifier order, then each classifier's own order.
/// The pipeline holds no per-frame state and can be shared across threads.
pub struct Pipeline {
    classifiers: Vec<Box<dyn Classifier>>,
    annotator: Annotator,
}

impl Pipeline {
    pub fn new(classifiers: Vec<Box<dyn Classifier>>, annotator: Annotator) -> Self {
        Self {
            classifiers,
            annotator,
        }
    }

    /// Standard face, helmet, phone, mask chain.
    pub fn from_config(cfg: &DetectorConfig) -> Result<Self> {
        cfg.validate()?;
        let backend = select_face_backend(&cfg.face);
        if let Err(e) = backend.warm_up() {
            log::warn!("face backend '{}' warm-up failed: {}", backend.name(), e);
        }
        let classifiers: Vec<Box<dyn Classifier>> = vec![
            Box::new(FaceClassifier::new(backend, &cfg.face)),
            Box::new(HelmetClassifier::new(cfg.helmet.clone())),
            Box::new(PhoneClassifier::new(cfg.phone.clone())),
            Box::new(MaskClassifier::new(cfg.mask.clone())),
        ];
        let annotator = Annotator::from_settings(&cfg.annotate)?;
        log::info!(
            "pipeline ready: {} classifiers, phone strategy {:?}",
            classifiers.len(),
            cfg.phone.strategy
        );
        Ok(Self::new(classifiers, annotator))
    }

    pub fn labels(&self) -> Vec<crate::detect::Label> {
        self.classifiers.iter().map(|c| c.label()).collect()
    }

    pub fn detect(&self, frame: &Frame) -> DetectResult<DetectionResult> {
        let ctx = FrameContext::new(frame);
        let mut detections: Vec<Detection> = Vec::new();

        for classifier in &self.classifiers {
            match classifier.classify(&ctx, &detections) {
                Ok(found) => detections.extend(found),
                Err(e) if e.is_recoverable() => {
                    log::warn!("skipping {} classifier: {}", classifier.label(), e);
                }
                Err(e) => return Err(e),
            }
        }

        let annotated = self.annotator.annotate(frame, &detections);
        Ok(DetectionResult {
            detections,
            annotated,
        })
    }

    /// Decode encoded image bytes, then `detect`.
    pub fn detect_bytes(&self, bytes: &[u8]) -> DetectResult<DetectionResult> {
        let frame = Frame::decode(bytes)?;
        self.detect(&frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::{StubBackend, UnavailableBackend};
    use crate::detect::config::{FaceSettings, HelmetSettings, MaskSettings, PhoneSettings};
    use crate::detect::Label;
    use crate::error::DetectError;
    use image::{Rgb, RgbImage};

    fn pipeline_with(backend: Box<dyn crate::detect::FaceBackend>) -> Pipeline {
        Pipeline::new(
            vec![
                Box::new(FaceClassifier::new(backend, &FaceSettings::default())),
                Box::new(HelmetClassifier::new(HelmetSettings::default())),
                Box::new(PhoneClassifier::new(PhoneSettings::default())),
                Box::new(MaskClassifier::new(MaskSettings::default())),
            ],
            Annotator::default(),
        )
    }

    #[test]
    fn unavailable_face_backend_is_skipped() {
        let pipeline = pipeline_with(Box::new(UnavailableBackend::new("no model")));
        let mut img = RgbImage::from_pixel(120, 120, Rgb([128, 128, 128]));
        for y in 10..55 {
            for x in 30..75 {
                img.put_pixel(x, y, Rgb([255, 213, 0]));
            }
        }
        let result = pipeline.detect(&Frame::new(img).unwrap()).unwrap();
        assert_eq!(result.labels(), vec![Label::Helmet]);
    }

    #[test]
    fn detections_follow_classifier_order() {
        let pipeline = pipeline_with(Box::new(StubBackend::with_faces(vec![[70, 10, 40, 40]])));
        let mut img = RgbImage::from_pixel(120, 120, Rgb([128, 128, 128]));
        // Dark portrait blob for the phone classifier.
        for y in 40..100 {
            for x in 10..40 {
                img.put_pixel(x, y, Rgb([10, 10, 10]));
            }
        }
        // White lower face for the mask classifier.
        for y in 30..46 {
            for x in 70..110 {
                img.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let result = pipeline.detect(&Frame::new(img).unwrap()).unwrap();
        assert_eq!(result.labels(), vec![Label::Face, Label::Phone, Label::Mask]);
        assert_eq!(result.count(), 3);
        assert_ne!(result.annotated.image().get_pixel(70, 10), &Rgb([128, 128, 128]));
    }

    #[test]
    fn undecodable_bytes_are_invalid_frames() {
        let pipeline = pipeline_with(Box::new(StubBackend::new()));
        let err = pipeline.detect_bytes(b"definitely not an image").unwrap_err();
        assert!(matches!(err, DetectError::InvalidFrame(_)));
        assert!(matches!(pipeline.detect_bytes(&[]), Err(DetectError::InvalidFrame(_))));
    }

    #[test]
    fn from_config_with_stub_backend() {
        let mut cfg = DetectorConfig::default();
        cfg.face.backend = crate::detect::config::FaceBackendKind::Stub;
        let pipeline = Pipeline::from_config(&cfg).unwrap();
        assert_eq!(
            pipeline.labels(),
            vec![Label::Face, Label::Helmet, Label::Phone, Label::Mask]
        );
    }
}
