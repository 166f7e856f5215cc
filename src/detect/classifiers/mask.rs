use crate::detect::classifier::{Classifier, FrameContext};
use crate::detect::config::MaskSettings;
use crate::detect::region::Region;
use crate::detect::result::{Detection, Label};
use crate::error::DetectResult;

/// Face coverings: blue or white fill of the lower face.
///
/// Depends on face detections from the same pass; with no faces it reports
/// nothing.
pub struct MaskClassifier {
    settings: MaskSettings,
}

impl MaskClassifier {
    pub fn new(settings: MaskSettings) -> Self {
        Self { settings }
    }

    /// Lower-face sub-region of `face`, or `None` when it would reach the
    /// bottom edge of the frame.
    pub fn lower_face(&self, face: &Region, frame_width: u32, frame_height: u32) -> Option<Region> {
        let s = &self.settings;
        let y = face.y + (face.height as f64 * s.offset_fraction) as u32;
        let height = (face.height as f64 * s.height_fraction) as u32;
        if height == 0 || y + height >= frame_height || face.x >= frame_width {
            return None;
        }
        let width = face.width.min(frame_width - face.x);
        if width == 0 {
            return None;
        }
        Some(Region::from_box(face.x, y, width, height))
    }

    fn covered_fraction(&self, ctx: &FrameContext<'_>, roi: &Region) -> f64 {
        let s = &self.settings;
        let mut covered = 0u64;
        for y in roi.y..roi.bottom() {
            for x in roi.x..roi.right() {
                let px = ctx.hsv.get_pixel(x, y).0;
                if s.blue.contains(px) || s.white.contains(px) {
                    covered += 1;
                }
            }
        }
        covered as f64 / roi.area
    }
}

impl Classifier for MaskClassifier {
    fn label(&self) -> Label {
        Label::Mask
    }

    fn classify(&self, ctx: &FrameContext<'_>, prior: &[Detection]) -> DetectResult<Vec<Detection>> {
        let s = &self.settings;
        Ok(prior
            .iter()
            .filter(|d| d.label == Label::Face)
            .filter_map(|face| self.lower_face(&face.region, ctx.width(), ctx.height()))
            .filter(|roi| self.covered_fraction(ctx, roi) > s.color_fraction)
            .map(|roi| Detection::new(Label::Mask, s.score, roi))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::{Rgb, RgbImage};

    fn face(x: u32, y: u32, w: u32, h: u32) -> Detection {
        Detection::new(Label::Face, 0.95, Region::from_box(x, y, w, h))
    }

    fn fill(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
        for y in y0..y0 + h {
            for x in x0..x0 + w {
                img.put_pixel(x, y, color);
            }
        }
    }

    fn classify(img: RgbImage, prior: &[Detection]) -> Vec<Detection> {
        let frame = Frame::new(img).unwrap();
        MaskClassifier::new(MaskSettings::default())
            .classify(&FrameContext::new(&frame), prior)
            .unwrap()
    }

    #[test]
    fn white_lower_face_is_a_mask() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        fill(&mut img, 20, 30, 40, 16, Rgb([255, 255, 255]));
        let out = classify(img, &[face(20, 10, 40, 40)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, Label::Mask);
        assert_eq!(out[0].score, 0.85);
        assert_eq!(out[0].region.as_xywh(), [20, 30, 40, 16]);
    }

    #[test]
    fn uncovered_lower_face_is_not_a_mask() {
        let img = RgbImage::from_pixel(100, 100, Rgb([200, 150, 130]));
        assert!(classify(img, &[face(20, 10, 40, 40)]).is_empty());
    }

    #[test]
    fn no_faces_means_no_masks() {
        let img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 255]));
        assert!(classify(img, &[]).is_empty());
    }

    #[test]
    fn sub_region_touching_bottom_is_skipped() {
        let img = RgbImage::from_pixel(100, 100, Rgb([0, 0, 255]));
        // 70 + 15 = 85, 85 + 12 = 97 < 100 is kept; 80 + 15 + 12 = 107 is not.
        assert_eq!(classify(img.clone(), &[face(10, 70, 30, 30)]).len(), 1);
        assert!(classify(img, &[face(10, 80, 30, 30)]).is_empty());
    }

    #[test]
    fn fraction_must_exceed_threshold() {
        let mut img = RgbImage::from_pixel(100, 100, Rgb([128, 128, 128]));
        // Lower face of (0, 0, 50, 50) is (0, 25, 50, 20); fill 30% exactly.
        fill(&mut img, 0, 25, 15, 20, Rgb([0, 0, 255]));
        assert!(classify(img.clone(), &[face(0, 0, 50, 50)]).is_empty());
        fill(&mut img, 15, 25, 1, 20, Rgb([0, 0, 255]));
        assert_eq!(classify(img, &[face(0, 0, 50, 50)]).len(), 1);
    }
}
