//! Error kinds surfaced by the detection core.
//!
//! `InvalidFrame` and `Encoding` abort a detection pass. `ClassifierUnavailable`
//! is recovered by the pipeline: the classifier is logged and skipped.

use crate::detect::Label;

pub type DetectResult<T> = std::result::Result<T, DetectError>;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// Empty, wrongly shaped or undecodable input.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// A classifier's detector dependency could not be used.
    #[error("{label} classifier unavailable: {reason}")]
    ClassifierUnavailable { label: Label, reason: String },

    /// The annotated frame could not be serialized.
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl DetectError {
    pub fn unavailable(label: Label, reason: impl Into<String>) -> Self {
        DetectError::ClassifierUnavailable {
            label,
            reason: reason.into(),
        }
    }

    /// True when the pipeline may skip the failing classifier and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DetectError::ClassifierUnavailable { .. })
    }
}
