use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};

use crate::frame::Frame;

const BACKGROUND: Rgb<u8> = Rgb([128, 128, 128]);
const HELMET_YELLOW: Rgb<u8> = Rgb([255, 213, 0]);
const PHONE_BLACK: Rgb<u8> = Rgb([12, 12, 12]);

/// Frames per scene before `cycle` advances.
const FRAMES_PER_SCENE: u64 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scene {
    Empty,
    Helmet,
    Phone,
}

impl Scene {
    const CYCLE: [Scene; 3] = [Scene::Empty, Scene::Helmet, Scene::Phone];

    fn parse(name: &str) -> Result<Option<Self>> {
        match name {
            "" | "cycle" | "yard" => Ok(None),
            "empty" => Ok(Some(Scene::Empty)),
            "helmet" => Ok(Some(Scene::Helmet)),
            "phone" => Ok(Some(Scene::Phone)),
            other => Err(anyhow!(
                "unknown synthetic scene '{}' (cycle|yard|empty|helmet|phone)",
                other
            )),
        }
    }
}

/// Synthetic frames for `stub://` urls: a fixed scene, or a cycle through
/// all scenes.
pub struct SyntheticSource {
    fixed: Option<Scene>,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(scene: &str, width: u32, height: u32) -> Result<Self> {
        if width < 160 || height < 120 {
            return Err(anyhow!("synthetic frames must be at least 160x120"));
        }
        Ok(Self {
            fixed: Scene::parse(scene)?,
            width,
            height,
            frame_count: 0,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        log::debug!("synthetic source {}x{} ready", self.width, self.height);
        Ok(())
    }

    pub fn scene_for(&self, index: u64) -> Scene {
        match self.fixed {
            Some(scene) => scene,
            None => Scene::CYCLE[((index / FRAMES_PER_SCENE) % Scene::CYCLE.len() as u64) as usize],
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let scene = self.scene_for(self.frame_count);
        self.frame_count += 1;
        Ok(Frame::new(self.render(scene))?)
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn render(&self, scene: Scene) -> RgbImage {
        let mut img = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let cx = self.width / 2;
        match scene {
            Scene::Empty => {}
            Scene::Helmet => {
                // Square, in the top third.
                let side = 50;
                fill(&mut img, cx - side / 2, self.height / 10, side, side, HELMET_YELLOW);
            }
            Scene::Phone => {
                // Portrait, 1:2.
                fill(&mut img, cx - 20, self.height / 3, 40, 80, PHONE_BLACK);
            }
        }
        img
    }
}

fn fill(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, color);
        }
    }
}
