use image::GrayImage;

use crate::detect::backend::{FaceBackend, FaceParams};
use crate::detect::region::Region;
use crate::detect::Label;
use crate::error::{DetectError, DetectResult};

/// Stub backend for testing. Returns a fixed list of face boxes, clipped to
/// the frame; boxes that fall outside entirely are dropped.
#[derive(Clone, Debug, Default)]
pub struct StubBackend {
    faces: Vec<[u32; 4]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faces(faces: Vec<[u32; 4]>) -> Self {
        Self { faces }
    }
}

impl FaceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect_faces(&self, gray: &GrayImage, _params: &FaceParams) -> DetectResult<Vec<Region>> {
        let (w, h) = gray.dimensions();
        Ok(self
            .faces
            .iter()
            .filter(|[x, y, fw, fh]| *x < w && *y < h && *fw > 0 && *fh > 0)
            .map(|&[x, y, fw, fh]| Region::from_box(x, y, fw.min(w - x), fh.min(h - y)))
            .collect())
    }
}

/// Stands in for a backend whose model could not be loaded.
#[derive(Clone, Debug)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl FaceBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    fn detect_faces(&self, _gray: &GrayImage, _params: &FaceParams) -> DetectResult<Vec<Region>> {
        Err(DetectError::unavailable(Label::Face, self.reason.clone()))
    }

    fn warm_up(&self) -> DetectResult<()> {
        Err(DetectError::unavailable(Label::Face, self.reason.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_clips_to_frame() {
        let backend = StubBackend::with_faces(vec![[10, 10, 50, 50], [90, 90, 30, 30], [200, 0, 5, 5]]);
        let gray = GrayImage::new(100, 100);
        let faces = backend.detect_faces(&gray, &FaceParams::default()).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[0].as_xywh(), [10, 10, 50, 50]);
        assert_eq!(faces[1].as_xywh(), [90, 90, 10, 10]);
    }

    #[test]
    fn unavailable_reports_recoverable_error() {
        let backend = UnavailableBackend::new("model missing");
        let err = backend
            .detect_faces(&GrayImage::new(10, 10), &FaceParams::default())
            .unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("model missing"));
    }
}
