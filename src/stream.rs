//! Continuous detection over a camera source.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::detect::{DetectionResult, Pipeline};
use crate::frame::Frame;
use crate::ingest::CameraSource;

/// Consecutive capture failures tolerated before the loop gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// One processed frame handed to the sink.
pub struct StreamFrame {
    /// Zero-based position in this loop's output.
    pub index: u64,
    pub captured_at: u64,
    /// Frame as captured, before annotation.
    pub frame: Frame,
    pub result: DetectionResult,
    /// Annotated frame as JPEG.
    pub jpeg: Vec<u8>,
}

/// What the sink wants after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct StreamLoop {
    source: CameraSource,
    pipeline: Arc<Pipeline>,
    frame_interval: Duration,
    max_frames: u64,
    running: Arc<AtomicBool>,
}

impl StreamLoop {
    pub fn new(source: CameraSource, pipeline: Arc<Pipeline>, target_fps: u32) -> Self {
        Self {
            source,
            pipeline,
            frame_interval: Duration::from_secs(1) / target_fps.max(1),
            max_frames: 0,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stop after `n` frames; zero means no limit.
    pub fn with_max_frames(mut self, n: u64) -> Self {
        self.max_frames = n;
        self
    }

    /// Clearing the flag stops the loop before its next frame.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn source(&self) -> &CameraSource {
        &self.source
    }

    /// Run until the sink stops, the frame limit is reached, the stop handle
    /// is cleared, or the source fails repeatedly. Returns frames delivered.
    pub fn run<F>(&mut self, mut sink: F) -> Result<u64>
    where
        F: FnMut(StreamFrame) -> Result<Flow>,
    {
        if !self.source.is_healthy() {
            self.source.connect()?;
        }
        let mut delivered = 0u64;
        let mut failures = 0u32;
        let mut last_health_log = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            if self.max_frames > 0 && delivered >= self.max_frames {
                break;
            }
            let started = Instant::now();

            let frame = match self.source.next_frame() {
                Ok(frame) => {
                    failures = 0;
                    frame
                }
                Err(e) => {
                    failures += 1;
                    log::warn!("frame capture failed ({}/{}): {:#}", failures, MAX_CONSECUTIVE_FAILURES, e);
                    if failures >= MAX_CONSECUTIVE_FAILURES {
                        return Err(anyhow!("camera source failed {} times in a row: {:#}", failures, e));
                    }
                    std::thread::sleep(self.frame_interval);
                    continue;
                }
            };

            let processed = self
                .pipeline
                .detect(&frame)
                .and_then(|result| result.annotated_jpeg().map(|jpeg| (result, jpeg)));
            let (result, jpeg) = match processed {
                Ok(processed) => processed,
                Err(e) => {
                    log::warn!("frame skipped: {}", e);
                    std::thread::sleep(self.frame_interval);
                    continue;
                }
            };

            let out = StreamFrame {
                index: delivered,
                captured_at: crate::now_s()?,
                frame,
                result,
                jpeg,
            };
            delivered += 1;
            if sink(out)? == Flow::Stop {
                break;
            }

            if last_health_log.elapsed() >= Duration::from_secs(5) {
                let stats = self.source.stats();
                log::info!(
                    "source health={} frames={} url={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.url
                );
                last_health_log = Instant::now();
            }

            if let Some(rest) = self.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{
        Annotator, Classifier, DetectorConfig, Detection, FaceBackendKind, FrameContext, Label,
    };
    use crate::error::{DetectError, DetectResult};
    use crate::ingest::SourceConfig;
    use std::sync::atomic::AtomicUsize;

    /// Fails every frame and counts the attempts.
    struct Failing(Arc<AtomicUsize>);

    impl Classifier for Failing {
        fn label(&self) -> Label {
            Label::Phone
        }

        fn classify(&self, _ctx: &FrameContext<'_>, _prior: &[Detection]) -> DetectResult<Vec<Detection>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(DetectError::InvalidFrame("sensor glitch".to_string()))
        }
    }

    fn pipeline() -> Arc<Pipeline> {
        let mut cfg = DetectorConfig::default();
        cfg.face.backend = FaceBackendKind::Stub;
        Arc::new(Pipeline::from_config(&cfg).unwrap())
    }

    #[test]
    fn stops_at_frame_limit() {
        let source = CameraSource::new(SourceConfig::new("stub://helmet")).unwrap();
        let mut stream = StreamLoop::new(source, pipeline(), 1000).with_max_frames(3);
        let mut seen = Vec::new();
        let n = stream
            .run(|frame| {
                seen.push((frame.index, frame.result.labels()));
                assert!(frame.jpeg.starts_with(&[0xFF, 0xD8]));
                Ok(Flow::Continue)
            })
            .unwrap();
        assert_eq!(n, 3);
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].0, 2);
        assert!(seen.iter().all(|(_, labels)| labels == &vec![Label::Helmet]));
    }

    #[test]
    fn sink_can_stop_the_loop() {
        let source = CameraSource::new(SourceConfig::new("stub://phone")).unwrap();
        let mut stream = StreamLoop::new(source, pipeline(), 1000);
        let n = stream
            .run(|frame| {
                assert_eq!(frame.result.labels(), vec![Label::Phone]);
                Ok(Flow::Stop)
            })
            .unwrap();
        assert_eq!(n, 1);
    }

    #[test]
    fn failed_frames_keep_the_frame_pace() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            vec![Box::new(Failing(Arc::clone(&attempts)))],
            Annotator::default(),
        );
        let source = CameraSource::new(SourceConfig::new("stub://empty")).unwrap();
        let mut stream = StreamLoop::new(source, Arc::new(pipeline), 20);
        let running = stream.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(300));
            running.store(false, Ordering::SeqCst);
        });

        let delivered = stream.run(|_| Ok(Flow::Continue)).unwrap();
        stopper.join().unwrap();
        assert_eq!(delivered, 0);
        // 50 ms per attempt over 300 ms.
        let n = attempts.load(Ordering::SeqCst);
        assert!((1..=10).contains(&n), "{} attempts", n);
    }

    #[test]
    fn stop_handle_prevents_frames() {
        let source = CameraSource::new(SourceConfig::new("stub://empty")).unwrap();
        let mut stream = StreamLoop::new(source, pipeline(), 1000);
        stream.stop_handle().store(false, Ordering::SeqCst);
        assert_eq!(stream.run(|_| Ok(Flow::Continue)).unwrap(), 0);
    }
}
