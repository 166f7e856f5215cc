use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::DetectorConfig;

const DEFAULT_DB_PATH: &str = "sitewatch.db";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8799";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_MAX_STREAM_FRAMES: u64 = 0;
const DEFAULT_MEDIA_ROOT: &str = "media";
const DEFAULT_MEDIA_URL: &str = "/media/";
const DEFAULT_SOURCE_URL: &str = "stub://yard";
const DEFAULT_TARGET_FPS: u32 = 5;

#[derive(Debug, Deserialize, Default)]
struct SiteConfigFile {
    db_path: Option<String>,
    api: Option<ApiConfigFile>,
    media: Option<MediaConfigFile>,
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfig>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<usize>,
    max_stream_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct MediaConfigFile {
    root: Option<PathBuf>,
    url_prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    persist_empty: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SiteConfig {
    pub db_path: String,
    pub api: ApiSettings,
    pub media: MediaSettings,
    pub source: SourceSettings,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub addr: String,
    pub max_upload_bytes: usize,
    /// Frames per `/video_feed` connection; zero streams until the client leaves.
    pub max_stream_frames: u64,
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub root: PathBuf,
    pub url_prefix: String,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
    /// Also persist stream frames with no detections.
    pub persist_empty: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self::from_file(SiteConfigFile::default())
    }
}

impl SiteConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SITEWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SiteConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let media = file.media.unwrap_or_default();
        let source = file.source.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            api: ApiSettings {
                addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
                max_upload_bytes: api.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
                max_stream_frames: api.max_stream_frames.unwrap_or(DEFAULT_MAX_STREAM_FRAMES),
            },
            media: MediaSettings {
                root: media
                    .root
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_ROOT)),
                url_prefix: media
                    .url_prefix
                    .unwrap_or_else(|| DEFAULT_MEDIA_URL.to_string()),
            },
            source: SourceSettings {
                url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
                target_fps: source.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
                persist_empty: source.persist_empty.unwrap_or(false),
            },
            detector: file.detector.unwrap_or_default(),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("SITEWATCH_DB_PATH") {
            self.db_path = path;
        }
        if let Some(addr) = non_empty_env("SITEWATCH_API_ADDR") {
            self.api.addr = addr;
        }
        if let Some(root) = non_empty_env("SITEWATCH_MEDIA_ROOT") {
            self.media.root = PathBuf::from(root);
        }
        if let Some(url) = non_empty_env("SITEWATCH_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(fps) = non_empty_env("SITEWATCH_TARGET_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("SITEWATCH_TARGET_FPS must be a positive integer"))?;
        }
        if let Some(path) = non_empty_env("SITEWATCH_CASCADE_PATH") {
            self.detector.face.cascade_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("SITEWATCH_FONT_PATH") {
            self.detector.annotate.font_path = Some(PathBuf::from(path));
        }
        if let Some(strategy) = non_empty_env("SITEWATCH_PHONE_STRATEGY") {
            self.detector.phone.strategy = strategy.parse()?;
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        if self.api.addr.trim().is_empty() {
            return Err(anyhow!("api.addr must not be empty"));
        }
        if self.api.max_upload_bytes == 0 {
            return Err(anyhow!("api.max_upload_bytes must be greater than zero"));
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source.target_fps must be greater than zero"));
        }
        if !self.media.url_prefix.ends_with('/') {
            self.media.url_prefix.push('/');
        }
        self.detector.validate()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<SiteConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
