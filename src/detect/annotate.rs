//! Box and label overlay.
//!
//! The annotator always draws onto a copy; the input frame is never touched.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::detect::config::AnnotateSettings;
use crate::detect::result::{Detection, Label};
use crate::frame::Frame;

/// Height of the label tab drawn when no font is configured.
const TAB_HEIGHT: u32 = 6;

pub fn label_color(label: Label) -> Rgb<u8> {
    match label {
        Label::Face => Rgb([0, 0, 255]),
        Label::Helmet => Rgb([255, 255, 0]),
        Label::Phone => Rgb([0, 255, 255]),
        Label::Mask => Rgb([0, 255, 0]),
    }
}

pub struct Annotator {
    font: Option<FontVec>,
    thickness: u32,
    text_scale: f32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            font: None,
            thickness: 2,
            text_scale: 18.0,
        }
    }
}

impl Annotator {
    pub fn from_settings(settings: &AnnotateSettings) -> Result<Self> {
        let font = match &settings.font_path {
            Some(path) => Some(load_font(path)?),
            None => None,
        };
        Ok(Self {
            font,
            thickness: settings.thickness.max(1),
            text_scale: settings.text_scale,
        })
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Copy of `frame` with one box and caption per detection, in order.
    pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
        if detections.is_empty() {
            return frame.clone();
        }
        let mut canvas = frame.image().clone();
        for detection in detections {
            self.draw_detection(&mut canvas, detection);
        }
        // Drawing never changes dimensions, so the copy is still a valid frame.
        Frame::new(canvas).unwrap_or_else(|_| frame.clone())
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let color = label_color(detection.label);
        let r = &detection.region;
        if r.width == 0 || r.height == 0 {
            return;
        }
        for inset in 0..self.thickness {
            let w = r.width.saturating_sub(2 * inset);
            let h = r.height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let rect = Rect::at((r.x + inset) as i32, (r.y + inset) as i32).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, color);
        }

        match &self.font {
            Some(font) => {
                let caption = format!("{} {:.2}", detection.label.title(), detection.score);
                let text_y = r.y as i32 - self.text_scale.ceil() as i32 - 2;
                draw_text_mut(
                    canvas,
                    color,
                    r.x as i32,
                    text_y.max(0),
                    PxScale::from(self.text_scale),
                    font,
                    &caption,
                );
            }
            None => {
                let tab_y = r.y.saturating_sub(TAB_HEIGHT);
                let tab_h = (r.y - tab_y).max(1).min(TAB_HEIGHT);
                let tab_w = r.width.min(8 * detection.label.title().len() as u32).max(1);
                let rect = Rect::at(r.x as i32, tab_y as i32).of_size(tab_w, tab_h);
                draw_filled_rect_mut(canvas, rect, color);
            }
        }
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("parse font {}", path.display()))
}
