//! sitewatchd - Site Watch daemon
//!
//! This daemon:
//! 1. Loads configuration (file from SITEWATCH_CONFIG, then env overrides)
//! 2. Serves the HTTP API (uploads, history, media, live MJPEG feed)
//! 3. Runs detection over the configured camera source
//! 4. Persists frames with detections (original + annotated + record)

use anyhow::{anyhow, Result};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use sitewatch::api::{ApiConfig, ApiServer, ApiState, SharedStore};
use sitewatch::{
    CameraSource, DetectionStore, Flow, MediaStore, Pipeline, SiteConfig, SourceConfig,
    SqliteDetectionStore, StreamLoop,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = SiteConfig::load()?;
    log::info!(
        "sitewatchd {} starting (db={}, media={}, source={})",
        env!("CARGO_PKG_VERSION"),
        cfg.db_path,
        cfg.media.root.display(),
        cfg.source.url
    );

    let store: Box<dyn DetectionStore> = Box::new(SqliteDetectionStore::open(&cfg.db_path)?);
    let store: SharedStore = Arc::new(Mutex::new(store));
    let media = MediaStore::open(&cfg.media.root, cfg.media.url_prefix.clone())?;
    let pipeline = Arc::new(Pipeline::from_config(&cfg.detector)?);

    let state = ApiState {
        pipeline: Arc::clone(&pipeline),
        store,
        media,
    };
    let api_config = ApiConfig {
        addr: cfg.api.addr.clone(),
        max_upload_bytes: cfg.api.max_upload_bytes,
        max_stream_frames: cfg.api.max_stream_frames,
        source_url: cfg.source.url.clone(),
        target_fps: cfg.source.target_fps,
    };
    let api_handle = ApiServer::new(api_config, state.clone()).spawn()?;
    log::info!("api listening on {}", api_handle.addr);

    let source = CameraSource::new(
        SourceConfig::new(cfg.source.url.clone()).with_fps(cfg.source.target_fps),
    )?;
    let mut stream = StreamLoop::new(source, pipeline, cfg.source.target_fps);
    let running = stream.stop_handle();
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install ctrl-c handler: {}", e))?;

    let persist_empty = cfg.source.persist_empty;
    let outcome = stream.run(|frame| {
        if frame.result.is_empty() && !persist_empty {
            return Ok(Flow::Continue);
        }
        let original = frame.frame.encode_jpeg()?;
        state.record(&original, &frame.jpeg, &frame.result.report(), frame.captured_at)?;
        Ok(Flow::Continue)
    });

    api_handle.stop()?;
    let frames = outcome?;
    log::info!("sitewatchd stopped after {} frame(s)", frames);
    Ok(())
}
