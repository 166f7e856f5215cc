//! Heuristic detection core: color normalization, region and edge
//! extraction, labelled classifiers, annotation and the orchestrating
//! pipeline.

mod annotate;
mod backend;
pub mod backends;
mod classifier;
mod classifiers;
pub mod color;
pub mod config;
pub mod edges;
mod pipeline;
pub mod region;
mod result;

pub use annotate::{label_color, Annotator};
pub use backend::{FaceBackend, FaceParams};
pub use backends::{select_face_backend, CascadeBackend, CascadeModel, StubBackend, UnavailableBackend};
pub use classifier::{Classifier, FrameContext};
pub use classifiers::{FaceClassifier, HelmetClassifier, MaskClassifier, PhoneClassifier};
pub use color::{HsvImage, HsvRange};
pub use config::{DetectorConfig, FaceBackendKind, PhoneStrategy};
pub use pipeline::Pipeline;
pub use region::{MorphStep, Region};
pub use result::{Detection, DetectionReport, DetectionResult, Label};
