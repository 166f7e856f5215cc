//! Frame acquisition.
//!
//! `CameraSource` owns one frame source for its lifetime:
//! - `stub://<scene>` synthetic scenes (testing, demos)
//! - a local image file, or a directory of images played in name order
//! - `v4l2:///dev/videoN` or `v4l2://N` capture devices (`ingest-v4l2`)
//!
//! Sources loop forever; the caller decides when to stop. Releasing the
//! source is logged when it is dropped.

pub mod file;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::frame::Frame;
use file::ImageFileSource;
use synthetic::SyntheticSource;

/// Configuration for a camera source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://<scene>`, `v4l2://<device>` or a local path.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Capture rate requested from devices; 0 keeps the device default.
    pub target_fps: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "stub://cycle".to_string(),
            width: 320,
            height: 240,
            target_fps: 0,
        }
    }
}

impl SourceConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_fps(mut self, target_fps: u32) -> Self {
        self.target_fps = target_fps;
        self
    }
}

pub struct CameraSource {
    backend: SourceBackend,
    url: String,
    connected: bool,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Images(ImageFileSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(v4l2::V4l2Source),
}

impl CameraSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let url = config.url.trim().to_string();
        if url.is_empty() {
            return Err(anyhow!("camera source url must not be empty"));
        }
        let backend = if let Some(scene) = url.strip_prefix("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(scene, config.width, config.height)?)
        } else if let Some(device) = url.strip_prefix("v4l2://") {
            device_backend(device_path(device)?, &config)?
        } else if url.contains("://") {
            return Err(anyhow!(
                "unsupported camera source '{}' (use stub://<scene>, v4l2://<device> or a local path)",
                url
            ));
        } else {
            SourceBackend::Images(ImageFileSource::new(&url)?)
        };
        Ok(Self {
            backend,
            url,
            connected: false,
        })
    }

    /// Connect to the source. Must be called before `next_frame`.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect()?,
            SourceBackend::Images(source) => source.connect()?,
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => source.connect()?,
        }
        self.connected = true;
        log::info!("camera source connected: {}", self.url);
        Ok(())
    }

    /// Capture the next frame.
    pub fn next_frame(&mut self) -> Result<Frame> {
        if !self.connected {
            return Err(anyhow!("camera source {} is not connected", self.url));
        }
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => source.next_frame(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.connected
            && match &self.backend {
                SourceBackend::Synthetic(_) => true,
                SourceBackend::Images(source) => source.is_healthy(),
                #[cfg(feature = "ingest-v4l2")]
                SourceBackend::Device(source) => source.is_healthy(),
            }
    }

    pub fn stats(&self) -> SourceStats {
        let frames_captured = match &self.backend {
            SourceBackend::Synthetic(source) => source.frames_captured(),
            SourceBackend::Images(source) => source.frames_captured(),
            #[cfg(feature = "ingest-v4l2")]
            SourceBackend::Device(source) => source.frames_captured(),
        };
        SourceStats {
            frames_captured,
            url: self.url.clone(),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if self.connected {
            log::info!(
                "camera source released: {} ({} frames)",
                self.url,
                self.stats().frames_captured
            );
        }
    }
}

/// `/dev/videoN` from `v4l2:///dev/videoN`, or from the `v4l2://N` shorthand.
fn device_path(device: &str) -> Result<String> {
    if device.len() > 1 && device.starts_with('/') {
        Ok(device.to_string())
    } else if !device.is_empty() && device.bytes().all(|b| b.is_ascii_digit()) {
        Ok(format!("/dev/video{}", device))
    } else {
        Err(anyhow!(
            "bad v4l2 device '{}' (use v4l2:///dev/videoN or v4l2://N)",
            device
        ))
    }
}

#[cfg(feature = "ingest-v4l2")]
fn device_backend(device: String, config: &SourceConfig) -> Result<SourceBackend> {
    Ok(SourceBackend::Device(v4l2::V4l2Source::new(
        device,
        config.width,
        config.height,
        config.target_fps,
    )))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn device_backend(device: String, _config: &SourceConfig) -> Result<SourceBackend> {
    Err(anyhow!(
        "camera device {} needs a build with the ingest-v4l2 feature",
        device
    ))
}

/// Statistics for a camera source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_remote_urls() {
        assert!(CameraSource::new(SourceConfig::new("rtsp://camera/stream")).is_err());
        assert!(CameraSource::new(SourceConfig::new("  ")).is_err());
    }

    #[test]
    fn device_urls_name_video_nodes() {
        assert_eq!(device_path("/dev/video2").unwrap(), "/dev/video2");
        assert_eq!(device_path("0").unwrap(), "/dev/video0");
        assert!(device_path("").is_err());
        assert!(device_path("/").is_err());
        assert!(device_path("front-door").is_err());
        assert!(CameraSource::new(SourceConfig::new("v4l2://front-door")).is_err());
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn device_sources_need_the_feature() {
        let err = CameraSource::new(SourceConfig::new("v4l2:///dev/video0"))
            .err()
            .expect("device source without ingest-v4l2");
        assert!(format!("{:#}", err).contains("ingest-v4l2"));
    }

    #[cfg(feature = "ingest-v4l2")]
    #[test]
    fn missing_device_fails_on_connect() {
        let mut source =
            CameraSource::new(SourceConfig::new("v4l2:///dev/sitewatch-missing").with_fps(5)).unwrap();
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }

    #[test]
    fn requires_connect() {
        let mut source = CameraSource::new(SourceConfig::new("stub://empty")).unwrap();
        assert!(source.next_frame().is_err());
        assert!(!source.is_healthy());
        source.connect().unwrap();
        assert!(source.is_healthy());
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width(), frame.height()), (320, 240));
        assert_eq!(source.stats().frames_captured, 1);
        assert_eq!(source.stats().url, "stub://empty");
    }
}
