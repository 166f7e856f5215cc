//! Site Watch
//!
//! Heuristic worksite monitoring: faces, helmets, phones and face masks are
//! detected in still images or a live camera feed, annotated, and recorded.
//!
//! # Module Structure
//!
//! - `frame`: Validated RGB frames and image codecs
//! - `detect`: Color/region/edge primitives, classifiers, annotator, pipeline
//! - `ingest`: Camera sources (synthetic `stub://`, local image files)
//! - `stream`: Paced detection loop over a camera source
//! - `storage`: Detection history (SQLite, in-memory)
//! - `media`: Original and annotated image files
//! - `api`: HTTP endpoints for uploads, history, media and the MJPEG feed
//! - `audit`: Sample security events and risk summaries

use anyhow::{anyhow, Result};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod audit;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod media;
pub mod storage;
pub mod stream;

pub use config::SiteConfig;
pub use detect::{
    Detection, DetectionReport, DetectionResult, DetectorConfig, Label, Pipeline, Region,
};
pub use error::{DetectError, DetectResult};
pub use frame::Frame;
pub use ingest::{CameraSource, SourceConfig};
pub use media::{MediaBatch, MediaStore};
pub use storage::{
    DetectionRecord, DetectionStore, InMemoryDetectionStore, NewDetectionRecord,
    SqliteDetectionStore,
};
pub use stream::{Flow, StreamFrame, StreamLoop};

/// Current time as epoch seconds.
pub fn now_s() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?
        .as_secs())
}
