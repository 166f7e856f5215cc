//! Local image frame source.
//!
//! Plays a single image, or every `.jpg`/`.jpeg`/`.png` file of a directory in
//! file-name order, looping at the end. Files are read and decoded on each
//! `next_frame`, so edits on disk show up on the next pass.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub struct ImageFileSource {
    path: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    frame_count: u64,
    last_error: Option<String>,
}

impl ImageFileSource {
    pub fn new(path: &str) -> Result<Self> {
        Ok(Self {
            path: PathBuf::from(path),
            files: Vec::new(),
            position: 0,
            frame_count: 0,
            last_error: None,
        })
    }

    pub fn connect(&mut self) -> Result<()> {
        self.files = list_images(&self.path)?;
        if self.files.is_empty() {
            return Err(anyhow!("no images found at {}", self.path.display()));
        }
        self.position = 0;
        log::debug!(
            "image source {}: {} file(s)",
            self.path.display(),
            self.files.len()
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let path = self
            .files
            .get(self.position)
            .cloned()
            .ok_or_else(|| anyhow!("image source {} has no files", self.path.display()))?;
        self.position = (self.position + 1) % self.files.len();

        let decoded = std::fs::read(&path)
            .with_context(|| format!("read {}", path.display()))
            .and_then(|bytes| {
                Frame::decode(&bytes).with_context(|| format!("decode {}", path.display()))
            });
        match decoded {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_error = None;
                Ok(frame)
            }
            Err(e) => {
                self.last_error = Some(format!("{:#}", e));
                Err(e)
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.files.is_empty() && self.last_error.is_none()
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

fn list_images(path: &Path) -> Result<Vec<PathBuf>> {
    let meta = std::fs::metadata(path).with_context(|| format!("open {}", path.display()))?;
    if meta.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path).with_context(|| format!("list {}", path.display()))? {
        let entry_path = entry?.path();
        if entry_path.is_file() && is_image(&entry_path) {
            files.push(entry_path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};

    fn write_png(dir: &Path, name: &str, color: [u8; 3]) {
        let bytes = Frame::new(RgbImage::from_pixel(8, 6, Rgb(color)))
            .unwrap()
            .encode(ImageFormat::Png)
            .unwrap();
        std::fs::write(dir.join(name), bytes).unwrap();
    }

    #[test]
    fn directory_plays_in_name_order_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        write_png(dir.path(), "b.png", [0, 0, 200]);
        write_png(dir.path(), "a.png", [200, 0, 0]);
        std::fs::write(dir.path().join("notes.txt"), b"skip me").unwrap();

        let mut source = ImageFileSource::new(dir.path().to_str().unwrap()).unwrap();
        source.connect().unwrap();
        let first = source.next_frame().unwrap();
        let second = source.next_frame().unwrap();
        let third = source.next_frame().unwrap();
        assert_eq!(first.image().get_pixel(0, 0), &Rgb([200, 0, 0]));
        assert_eq!(second.image().get_pixel(0, 0), &Rgb([0, 0, 200]));
        assert_eq!(third, first);
        assert_eq!(source.frames_captured(), 3);
        assert!(source.is_healthy());
    }

    #[test]
    fn empty_directory_fails_to_connect() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ImageFileSource::new(dir.path().to_str().unwrap()).unwrap();
        assert!(source.connect().is_err());
    }

    #[test]
    fn corrupt_file_marks_source_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not a jpeg").unwrap();
        let mut source = ImageFileSource::new(dir.path().to_str().unwrap()).unwrap();
        source.connect().unwrap();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
    }
}
