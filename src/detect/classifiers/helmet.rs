use crate::detect::classifier::{Classifier, FrameContext};
use crate::detect::color::in_range;
use crate::detect::config::HelmetSettings;
use crate::detect::region::{extract_regions, prepare_mask, MorphStep};
use crate::detect::result::{Detection, Label};
use crate::error::DetectResult;

/// Yellow-ish, roughly square blobs in the upper part of the frame.
pub struct HelmetClassifier {
    settings: HelmetSettings,
}

impl HelmetClassifier {
    pub fn new(settings: HelmetSettings) -> Self {
        Self { settings }
    }
}

impl Classifier for HelmetClassifier {
    fn label(&self) -> Label {
        Label::Helmet
    }

    fn classify(&self, ctx: &FrameContext<'_>, _prior: &[Detection]) -> DetectResult<Vec<Detection>> {
        let s = &self.settings;
        let mask = prepare_mask(
            in_range(&ctx.hsv, &s.hsv),
            &[MorphStep::Open(s.open_kernel), MorphStep::Close(s.close_kernel)],
        );
        let top_limit = s.max_top_fraction * ctx.height() as f64;

        Ok(extract_regions(&mask, s.min_area, f64::INFINITY)
            .into_iter()
            .filter(|r| r.area > s.min_area)
            .filter(|r| s.aspect.contains_inclusive(r.aspect_ratio()))
            .filter(|r| (r.y as f64) < top_limit)
            .map(|r| Detection::new(Label::Helmet, s.score, r))
            .collect())
    }
}
