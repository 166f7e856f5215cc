//! V4L2 capture device source.
//!
//! The device node and its mmap buffer stream are opened by `connect` and
//! held until the source is dropped, which closes the stream and then the
//! device. RGB3 is requested; devices that insist on YUYV or MJPG are
//! converted to RGB per frame.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

use crate::frame::Frame;

const BUFFER_COUNT: u32 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PixelLayout {
    Rgb3,
    Yuyv,
    Mjpg,
}

impl PixelLayout {
    fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"RGB3" => Some(Self::Rgb3),
            b"YUYV" => Some(Self::Yuyv),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this>,
}

pub struct V4l2Source {
    device_path: String,
    width: u32,
    height: u32,
    target_fps: u32,
    layout: PixelLayout,
    state: Option<DeviceState>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
    last_error: Option<String>,
}

impl V4l2Source {
    pub fn new(device_path: String, width: u32, height: u32, target_fps: u32) -> Self {
        Self {
            device_path,
            width,
            height,
            target_fps,
            layout: PixelLayout::Rgb3,
            state: None,
            frame_count: 0,
            last_frame_at: None,
            last_error: None,
        }
    }

    pub fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.device_path)
            .with_context(|| format!("open v4l2 device {}", self.device_path))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.width;
        format.height = self.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("v4l2 {}: failed to set format: {}", self.device_path, err);
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let layout = PixelLayout::from_fourcc(&format.fourcc.repr).ok_or_else(|| {
            anyhow!(
                "v4l2 {}: unsupported pixel format {}",
                self.device_path,
                format.fourcc
            )
        })?;

        if self.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("v4l2 {}: failed to set fps: {}", self.device_path, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, BUFFER_COUNT)
                    .context("create v4l2 buffer stream")
            },
        }
        .try_build()
        .map_err(|err| {
            self.last_error = Some(format!("{:#}", err));
            err
        })?;

        self.width = format.width;
        self.height = format.height;
        self.layout = layout;
        self.state = Some(state);
        self.last_error = None;
        log::info!(
            "v4l2 {}: streaming {}x{} {:?}",
            self.device_path,
            self.width,
            self.height,
            self.layout
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let (layout, width, height) = (self.layout, self.width, self.height);
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| anyhow!("v4l2 device not connected"))?;
        let captured = state.with_stream_mut(|stream| -> Result<Frame> {
            let (buf, _meta) = stream.next().context("capture v4l2 frame")?;
            to_frame(layout, width, height, buf)
        });
        match captured {
            Ok(frame) => {
                self.frame_count += 1;
                self.last_frame_at = Some(Instant::now());
                self.last_error = None;
                Ok(frame)
            }
            Err(err) => {
                self.last_error = Some(format!("{:#}", err));
                Err(err)
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        if self.state.is_none() || self.last_error.is_some() {
            return false;
        }
        match self.last_frame_at {
            Some(at) => at.elapsed() <= self.health_grace(),
            None => true,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.target_fps == 0 {
            2_000
        } else {
            (1000 / self.target_fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

fn to_frame(layout: PixelLayout, width: u32, height: u32, buf: &[u8]) -> Result<Frame> {
    let pixels = width as usize * height as usize;
    let frame = match layout {
        PixelLayout::Rgb3 => {
            let data = buf
                .get(..pixels * 3)
                .ok_or_else(|| anyhow!("short RGB3 buffer: {} bytes", buf.len()))?;
            Frame::from_raw(width, height, 3, data.to_vec())?
        }
        PixelLayout::Yuyv => Frame::from_raw(width, height, 3, yuyv_to_rgb(buf, width, height)?)?,
        PixelLayout::Mjpg => Frame::decode(buf)?,
    };
    Ok(frame)
}

/// Packed 4:2:2 (`Y0 U Y1 V`) to RGB with BT.601 studio-range coefficients.
fn yuyv_to_rgb(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frames need an even width, got {}", width));
    }
    let pixels = width as usize * height as usize;
    let packed = buf
        .get(..pixels * 2)
        .ok_or_else(|| anyhow!("short YUYV buffer: {} bytes", buf.len()))?;
    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in packed.chunks_exact(4) {
        let (u, v) = (quad[1], quad[3]);
        rgb.extend_from_slice(&yuv_to_rgb(quad[0], u, v));
        rgb.extend_from_slice(&yuv_to_rgb(quad[2], u, v));
    }
    Ok(rgb)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = 298 * (y as i32 - 16);
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let channel = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    [
        channel(c + 409 * e),
        channel(c - 100 * d - 208 * e),
        channel(c + 516 * d),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_extremes_map_to_black_and_white() {
        let buf = [16, 128, 235, 128];
        assert_eq!(yuyv_to_rgb(&buf, 2, 1).unwrap(), vec![0, 0, 0, 255, 255, 255]);
        assert!(yuyv_to_rgb(&buf, 3, 1).is_err());
        assert!(yuyv_to_rgb(&buf, 2, 2).is_err());
    }

    #[test]
    fn rgb3_buffers_are_trimmed_to_the_frame() {
        let mut buf = vec![7u8; 2 * 2 * 3];
        buf.extend_from_slice(&[0, 0]);
        let frame = to_frame(PixelLayout::Rgb3, 2, 2, &buf).unwrap();
        assert_eq!((frame.width(), frame.height()), (2, 2));
        assert!(to_frame(PixelLayout::Rgb3, 4, 4, &buf).is_err());
    }

    #[test]
    fn fourcc_layouts() {
        assert_eq!(PixelLayout::from_fourcc(b"YUYV"), Some(PixelLayout::Yuyv));
        assert_eq!(PixelLayout::from_fourcc(b"MJPG"), Some(PixelLayout::Mjpg));
        assert_eq!(PixelLayout::from_fourcc(b"NV12"), None);
    }

    #[test]
    fn missing_device_fails_to_connect() {
        let mut source = V4l2Source::new("/dev/sitewatch-missing".to_string(), 320, 240, 5);
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        assert!(source.next_frame().is_err());
    }
}
