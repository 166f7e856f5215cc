use image::GrayImage;

use crate::detect::config::FaceSettings;
use crate::detect::region::Region;
use crate::error::DetectResult;

/// Scan parameters handed to a face backend on every call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FaceParams {
    pub scale_factor: f64,
    pub min_neighbors: u32,
    pub min_size: u32,
}

impl Default for FaceParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 5,
            min_size: 30,
        }
    }
}

impl From<&FaceSettings> for FaceParams {
    fn from(settings: &FaceSettings) -> Self {
        Self {
            scale_factor: settings.scale_factor,
            min_neighbors: settings.min_neighbors,
            min_size: settings.min_size,
        }
    }
}

/// Face detector backend.
///
/// Backends are loaded once and shared read-only across detection passes, so
/// `detect_faces` takes `&self` and must not keep per-frame state.
pub trait FaceBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Face boxes in frame coordinates, in the backend's output order.
    ///
    /// Returns `ClassifierUnavailable` when the backend's model could not be
    /// loaded; any other failure on a well-formed image is a backend bug.
    fn detect_faces(&self, gray: &GrayImage, params: &FaceParams) -> DetectResult<Vec<Region>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> DetectResult<()> {
        Ok(())
    }
}
