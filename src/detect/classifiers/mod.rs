mod face;
mod helmet;
mod mask;
mod phone;

pub use face::FaceClassifier;
pub use helmet::HelmetClassifier;
pub use mask::MaskClassifier;
pub use phone::PhoneClassifier;
