use crate::detect::classifier::{Classifier, FrameContext};
use crate::detect::color::in_range;
use crate::detect::config::{PhoneSettings, PhoneStrategy};
use crate::detect::edges::extract_edges;
use crate::detect::region::{extract_regions, prepare_mask, MorphStep, Region};
use crate::detect::result::{Detection, Label};
use crate::error::DetectResult;

/// Hand-held device candidates. Two strategies share the label:
///
/// - `Darkblob`: very dark, portrait-shaped blobs after mask cleanup.
/// - `Edge`: closed edge outlines with phone-like proportions in either
///   orientation.
pub struct PhoneClassifier {
    settings: PhoneSettings,
}

impl PhoneClassifier {
    pub fn new(settings: PhoneSettings) -> Self {
        Self { settings }
    }

    pub fn strategy(&self) -> PhoneStrategy {
        self.settings.strategy
    }

    fn dark_blobs(&self, ctx: &FrameContext<'_>) -> Vec<Region> {
        let s = &self.settings;
        let mask = prepare_mask(
            in_range(&ctx.hsv, &s.dark_hsv),
            &[MorphStep::Close(s.dark_kernel), MorphStep::Open(s.dark_kernel)],
        );
        extract_regions(&mask, s.dark_area.min, s.dark_area.max)
            .into_iter()
            .filter(|r| s.dark_area.contains_exclusive(r.area))
            .filter(|r| s.dark_aspect.contains_exclusive(r.aspect_ratio()))
            .collect()
    }

    fn edge_outlines(&self, ctx: &FrameContext<'_>) -> Vec<Region> {
        let s = &self.settings;
        let edges = extract_edges(&ctx.gray, s.edge_low, s.edge_high);
        extract_regions(&edges, s.edge_area.min, s.edge_area.max)
            .into_iter()
            .filter(|r| s.edge_area.contains_exclusive(r.area))
            .filter(|r| {
                let ratio = r.aspect_ratio();
                s.edge_aspects.iter().any(|band| band.contains_inclusive(ratio))
            })
            .collect()
    }
}

impl Classifier for PhoneClassifier {
    fn label(&self) -> Label {
        Label::Phone
    }

    fn classify(&self, ctx: &FrameContext<'_>, _prior: &[Detection]) -> DetectResult<Vec<Detection>> {
        let regions = match self.settings.strategy {
            PhoneStrategy::Darkblob => self.dark_blobs(ctx),
            PhoneStrategy::Edge => self.edge_outlines(ctx),
        };
        let score = self.settings.score();
        Ok(regions
            .into_iter()
            .map(|r| Detection::new(Label::Phone, score, r))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::{Rgb, RgbImage};

    fn frame_with_rect(bg: Rgb<u8>, fg: Rgb<u8>, x0: u32, y0: u32, w: u32, h: u32) -> Frame {
        let mut img = RgbImage::from_pixel(120, 120, bg);
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, fg);
            }
        }
        Frame::new(img).unwrap()
    }

    fn classify(settings: PhoneSettings, frame: &Frame) -> Vec<Detection> {
        PhoneClassifier::new(settings)
            .classify(&FrameContext::new(frame), &[])
            .unwrap()
    }

    #[test]
    fn dark_portrait_blob_is_a_phone() {
        let frame = frame_with_rect(Rgb([128, 128, 128]), Rgb([10, 10, 10]), 40, 30, 30, 60);
        let out = classify(PhoneSettings::default(), &frame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.78);
        assert_eq!(out[0].region.as_xywh(), [40, 30, 30, 60]);
    }

    #[test]
    fn dark_landscape_blob_is_ignored_by_darkblob() {
        let frame = frame_with_rect(Rgb([128, 128, 128]), Rgb([10, 10, 10]), 20, 40, 60, 30);
        assert!(classify(PhoneSettings::default(), &frame).is_empty());
    }

    #[test]
    fn bright_scene_has_no_dark_blobs() {
        let frame = frame_with_rect(Rgb([128, 128, 128]), Rgb([200, 200, 200]), 40, 30, 30, 60);
        assert!(classify(PhoneSettings::default(), &frame).is_empty());
    }

    #[test]
    fn edge_strategy_finds_outlined_rectangle() {
        let settings = PhoneSettings {
            strategy: PhoneStrategy::Edge,
            ..PhoneSettings::default()
        };
        let frame = frame_with_rect(Rgb([0, 0, 0]), Rgb([255, 255, 255]), 40, 20, 30, 50);
        let out = classify(settings, &frame);
        assert!(!out.is_empty());
        assert_eq!(out[0].score, 0.85);
        let r = out[0].region;
        assert!(r.x.abs_diff(40) <= 3 && r.y.abs_diff(20) <= 3, "{:?}", r);
    }

    #[test]
    fn edge_strategy_ignores_flat_frame() {
        let settings = PhoneSettings {
            strategy: PhoneStrategy::Edge,
            ..PhoneSettings::default()
        };
        let frame = Frame::new(RgbImage::from_pixel(120, 120, Rgb([90, 90, 90]))).unwrap();
        assert!(classify(settings, &frame).is_empty());
    }
}
