pub mod cascade;
mod cascade_xml;
pub mod stub;

pub use cascade::{CascadeBackend, CascadeModel, WeakClassifier};
pub use stub::{StubBackend, UnavailableBackend};

use crate::detect::backend::FaceBackend;
use crate::detect::config::{FaceBackendKind, FaceSettings};

/// Build the configured face backend. A cascade that fails to load is
/// replaced by an `UnavailableBackend` so the face classifier is skipped
/// instead of failing startup.
pub fn select_face_backend(settings: &FaceSettings) -> Box<dyn FaceBackend> {
    match settings.backend {
        FaceBackendKind::Stub => Box::new(StubBackend::with_faces(settings.stub_faces.clone())),
        FaceBackendKind::Cascade => match CascadeBackend::load(&settings.cascade_path) {
            Ok(backend) => Box::new(backend),
            Err(e) => {
                log::warn!("face detection disabled: {:#}", e);
                Box::new(UnavailableBackend::new(format!("{:#}", e)))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cascade_selects_unavailable() {
        let settings = FaceSettings {
            cascade_path: "/nonexistent/haarcascade_frontalface_default.xml".into(),
            ..FaceSettings::default()
        };
        assert_eq!(select_face_backend(&settings).name(), "unavailable");
    }

    #[test]
    fn stub_selection() {
        let settings = FaceSettings {
            backend: FaceBackendKind::Stub,
            ..FaceSettings::default()
        };
        assert_eq!(select_face_backend(&settings).name(), "stub");
    }
}
