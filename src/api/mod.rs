//! HTTP surface for uploads, detection history, media and the live feed.
//!
//! Requests are served one at a time on the listener thread; each
//! `/video_feed` connection gets its own thread and camera source.

mod http;

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::detect::{DetectionReport, Pipeline};
use crate::error::DetectError;
use crate::ingest::{CameraSource, SourceConfig};
use crate::media::{content_type_for, MediaStore};
use crate::storage::{DetectionRecord, DetectionStore, NewDetectionRecord};
use crate::stream::{Flow, StreamLoop};
use http::{
    read_request, set_timeouts, write_json_response, write_multipart_header,
    write_multipart_jpeg, write_response, HttpRequest, ReadOutcome,
};

const DEFAULT_LIST_LIMIT: usize = 5;
const MAX_LIST_LIMIT: usize = 500;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub max_upload_bytes: usize,
    /// Frames per `/video_feed` connection; zero means until the client leaves.
    pub max_stream_frames: u64,
    pub source_url: String,
    pub target_fps: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8799".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
            max_stream_frames: 0,
            source_url: "stub://yard".to_string(),
            target_fps: 5,
        }
    }
}

pub type SharedStore = Arc<Mutex<Box<dyn DetectionStore>>>;

/// Everything a request handler can touch.
#[derive(Clone)]
pub struct ApiState {
    pub pipeline: Arc<Pipeline>,
    pub store: SharedStore,
    pub media: MediaStore,
}

impl ApiState {
    /// Store both images and persist a record pointing at them. Images
    /// written here are removed again if the record cannot be stored.
    pub fn record(
        &self,
        original: &[u8],
        processed_jpeg: &[u8],
        report: &DetectionReport,
        created_at: u64,
    ) -> Result<DetectionRecord> {
        let mut batch = self.media.batch();
        let image_path = batch.save_original(original, created_at)?;
        let processed_path = batch.save_processed(processed_jpeg, created_at)?;
        let record = lock_store(self)?.insert(&NewDetectionRecord::from_report(
            created_at,
            image_path,
            Some(processed_path),
            report,
        ))?;
        batch.commit();
        log::info!(
            "detection #{} stored: {} detection(s) {:?}",
            record.id,
            record.detection_count,
            record.objects_detected
        );
        Ok(record)
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    state: ApiState,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, state: ApiState) -> Self {
        Self { cfg, state }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, self.cfg, self.state, shutdown_thread) {
                log::error!("api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    state: ApiState,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, &cfg, &state, &shutdown) {
                    log::warn!("api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &Arc<AtomicBool>,
) -> Result<()> {
    set_timeouts(&stream)?;
    let request = match read_request(&mut stream, cfg.max_upload_bytes)? {
        ReadOutcome::Request(request) => request,
        ReadOutcome::BodyTooLarge { declared } => {
            log::warn!(
                "upload rejected: {} bytes exceeds limit of {}",
                declared,
                cfg.max_upload_bytes
            );
            return write_json_response(
                &mut stream,
                413,
                r#"{"success":false,"error":"payload_too_large"}"#,
            );
        }
    };

    let path = request.path.trim_end_matches('/');
    match (request.method.as_str(), path) {
        ("GET", "/health") => write_json_response(&mut stream, 200, r#"{"status":"ok"}"#),
        ("GET", "/detections") => list_detections(&mut stream, &request, state),
        ("GET", p) if p.starts_with("/detections/") => {
            get_detection(&mut stream, &p["/detections/".len()..], state)
        }
        ("POST", "/upload") => upload(&mut stream, &request, state),
        ("GET", "/video_feed") => {
            spawn_video_feed(stream, cfg, state, shutdown);
            Ok(())
        }
        ("GET", p) if p.starts_with("/media/") => {
            serve_media(&mut stream, &p["/media/".len()..], state)
        }
        (_, "/health" | "/detections" | "/upload" | "/video_feed") => {
            write_json_response(&mut stream, 405, r#"{"error":"method_not_allowed"}"#)
        }
        _ => write_json_response(&mut stream, 404, r#"{"error":"not_found"}"#),
    }
}

/// Record as served over the API, with media urls.
#[derive(Debug, Serialize)]
struct RecordView {
    id: i64,
    created_at: u64,
    objects_detected: Vec<String>,
    confidence_scores: Vec<f32>,
    detection_count: usize,
    image_url: Option<String>,
    processed_image_url: Option<String>,
}

impl RecordView {
    fn new(record: DetectionRecord, media: &MediaStore) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            image_url: Some(record.image_path.as_str())
                .filter(|p| !p.is_empty())
                .map(|p| media.url(p)),
            processed_image_url: record.processed_image_path.as_deref().map(|p| media.url(p)),
            objects_detected: record.objects_detected,
            confidence_scores: record.confidence_scores,
            detection_count: record.detection_count,
        }
    }
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    success: bool,
    id: i64,
    detection_count: usize,
    objects: Vec<String>,
    confidence_scores: Vec<f32>,
    boxes: Vec<[u32; 4]>,
    original_image_url: String,
    processed_image_url: String,
}

fn lock_store(state: &ApiState) -> Result<std::sync::MutexGuard<'_, Box<dyn DetectionStore>>> {
    state
        .store
        .lock()
        .map_err(|_| anyhow!("detection store lock poisoned"))
}

fn list_detections(stream: &mut TcpStream, request: &HttpRequest, state: &ApiState) -> Result<()> {
    let limit = match request.query_param("limit") {
        None => DEFAULT_LIST_LIMIT,
        Some(raw) => match raw.parse::<usize>() {
            Ok(n) => n.min(MAX_LIST_LIMIT),
            Err(_) => {
                return write_json_response(stream, 400, r#"{"error":"invalid_limit"}"#);
            }
        },
    };
    let records = lock_store(state)?.recent(limit)?;
    let views: Vec<RecordView> = records
        .into_iter()
        .map(|r| RecordView::new(r, &state.media))
        .collect();
    write_response(stream, 200, "application/json", &serde_json::to_vec(&views)?)
}

fn get_detection(stream: &mut TcpStream, raw_id: &str, state: &ApiState) -> Result<()> {
    let Ok(id) = raw_id.parse::<i64>() else {
        return write_json_response(stream, 400, r#"{"error":"invalid_id"}"#);
    };
    let record = lock_store(state)?.get(id)?;
    match record {
        Some(record) => {
            let view = RecordView::new(record, &state.media);
            write_response(stream, 200, "application/json", &serde_json::to_vec(&view)?)
        }
        None => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn upload(stream: &mut TcpStream, request: &HttpRequest, state: &ApiState) -> Result<()> {
    let result = match state.pipeline.detect_bytes(&request.body) {
        Ok(result) => result,
        Err(DetectError::InvalidFrame(reason)) => {
            log::warn!("upload rejected: {}", reason);
            let body = serde_json::json!({ "success": false, "error": "invalid_image", "detail": reason });
            return write_response(stream, 400, "application/json", &serde_json::to_vec(&body)?);
        }
        Err(e) => return Err(e.into()),
    };
    let report: DetectionReport = result.report();
    let processed = result.annotated_jpeg()?;

    let record = state.record(&request.body, &processed, &report, crate::now_s()?)?;
    let processed_path = record.processed_image_path.as_deref().unwrap_or_default();

    let response = UploadResponse {
        success: true,
        id: record.id,
        detection_count: report.detection_count,
        objects: report.objects_detected,
        confidence_scores: report.confidence_scores,
        boxes: report.boxes,
        original_image_url: state.media.url(&record.image_path),
        processed_image_url: state.media.url(processed_path),
    };
    write_response(stream, 200, "application/json", &serde_json::to_vec(&response)?)
}

fn serve_media(stream: &mut TcpStream, rel: &str, state: &ApiState) -> Result<()> {
    let Some(path) = state.media.resolve(rel) else {
        return write_json_response(stream, 400, r#"{"error":"invalid_path"}"#);
    };
    match std::fs::read(&path) {
        Ok(bytes) => write_response(stream, 200, content_type_for(rel), &bytes),
        Err(_) => write_json_response(stream, 404, r#"{"error":"not_found"}"#),
    }
}

fn spawn_video_feed(
    mut stream: TcpStream,
    cfg: &ApiConfig,
    state: &ApiState,
    shutdown: &Arc<AtomicBool>,
) {
    let pipeline = state.pipeline.clone();
    let cfg = cfg.clone();
    let shutdown = shutdown.clone();
    std::thread::spawn(move || {
        if let Err(err) = serve_video_feed(&mut stream, &cfg, pipeline, &shutdown) {
            log::warn!("video feed ended: {:#}", err);
        }
    });
}

fn serve_video_feed(
    stream: &mut TcpStream,
    cfg: &ApiConfig,
    pipeline: Arc<Pipeline>,
    shutdown: &AtomicBool,
) -> Result<()> {
    let source = match CameraSource::new(
        SourceConfig::new(cfg.source_url.clone()).with_fps(cfg.target_fps),
    ) {
        Ok(source) => source,
        Err(e) => {
            write_json_response(stream, 500, r#"{"error":"camera_unavailable"}"#)?;
            return Err(e);
        }
    };
    let mut feed = StreamLoop::new(source, pipeline, cfg.target_fps)
        .with_max_frames(cfg.max_stream_frames);
    write_multipart_header(stream)?;

    let sent = feed.run(|frame| {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(Flow::Stop);
        }
        match write_multipart_jpeg(stream, &frame.jpeg) {
            Ok(()) => Ok(Flow::Continue),
            Err(e) => {
                log::debug!("video feed client gone: {}", e);
                Ok(Flow::Stop)
            }
        }
    })?;
    log::info!("video feed closed after {} frame(s)", sent);
    Ok(())
}
