use anyhow::{anyhow, Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Component, Path, PathBuf};

const ORIGINALS_DIR: &str = "detections";
const PROCESSED_DIR: &str = "processed";

/// Where uploaded and annotated images live on disk.
///
/// Paths handed out are relative to the media root and always use `/`.
#[derive(Clone, Debug)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    pub fn open(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Result<Self> {
        let root = root.into();
        for dir in [ORIGINALS_DIR, PROCESSED_DIR] {
            std::fs::create_dir_all(root.join(dir))
                .with_context(|| format!("create media dir {}", root.join(dir).display()))?;
        }
        let mut url_prefix = url_prefix.into();
        if !url_prefix.ends_with('/') {
            url_prefix.push('/');
        }
        Ok(Self { root, url_prefix })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store an original upload; the extension follows the sniffed format.
    pub fn save_original(&self, bytes: &[u8], created_at: u64) -> Result<String> {
        self.write_original(bytes, created_at).map(|(rel, _)| rel)
    }

    /// Store an annotated JPEG.
    pub fn save_processed(&self, jpeg: &[u8], created_at: u64) -> Result<String> {
        self.write_processed(jpeg, created_at).map(|(rel, _)| rel)
    }

    /// Start a group of writes that is rolled back unless committed.
    pub fn batch(&self) -> MediaBatch<'_> {
        MediaBatch {
            media: self,
            created: Vec::new(),
            committed: false,
        }
    }

    fn write_original(&self, bytes: &[u8], created_at: u64) -> Result<(String, Option<PathBuf>)> {
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(|fmt| fmt.extensions_str().first().copied())
            .unwrap_or("bin");
        self.write(ORIGINALS_DIR, "", bytes, created_at, ext)
    }

    fn write_processed(&self, jpeg: &[u8], created_at: u64) -> Result<(String, Option<PathBuf>)> {
        self.write(PROCESSED_DIR, "processed_", jpeg, created_at, "jpg")
    }

    /// Returns the relative path, plus the absolute path when the file did
    /// not exist before. Names are content-addressed, so an existing file
    /// already holds the same bytes.
    fn write(
        &self,
        dir: &str,
        prefix: &str,
        bytes: &[u8],
        created_at: u64,
        ext: &str,
    ) -> Result<(String, Option<PathBuf>)> {
        let digest = hex::encode(Sha256::digest(bytes));
        let name = format!("{}{}_{}.{}", prefix, created_at, &digest[..12], ext);
        let rel = format!("{}/{}", dir, name);
        let path = self.root.join(dir).join(&name);
        let fresh = !path.exists();
        std::fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        log::debug!("stored media {} ({} bytes)", rel, bytes.len());
        Ok((rel, fresh.then_some(path)))
    }

    pub fn url(&self, rel: &str) -> String {
        format!("{}{}", self.url_prefix, rel.trim_start_matches('/'))
    }

    /// Absolute path for a relative media path, or `None` if it would escape
    /// the media root.
    pub fn resolve(&self, rel: &str) -> Option<PathBuf> {
        let rel_path = Path::new(rel);
        if rel.is_empty() || rel_path.is_absolute() {
            return None;
        }
        if rel_path
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.root.join(rel_path))
    }

    pub fn read(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self
            .resolve(rel)
            .ok_or_else(|| anyhow!("media path outside root: {}", rel))?;
        std::fs::read(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Media written for one record. Files the batch created are removed when
/// it is dropped without `commit`, so a failed insert leaves no orphans.
pub struct MediaBatch<'a> {
    media: &'a MediaStore,
    created: Vec<PathBuf>,
    committed: bool,
}

impl MediaBatch<'_> {
    pub fn save_original(&mut self, bytes: &[u8], created_at: u64) -> Result<String> {
        let (rel, fresh) = self.media.write_original(bytes, created_at)?;
        self.created.extend(fresh);
        Ok(rel)
    }

    pub fn save_processed(&mut self, jpeg: &[u8], created_at: u64) -> Result<String> {
        let (rel, fresh) = self.media.write_processed(jpeg, created_at)?;
        self.created.extend(fresh);
        Ok(rel)
    }

    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for MediaBatch<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in &self.created {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("removed uncommitted media {}", path.display()),
                Err(e) => log::warn!("failed to remove media {}: {}", path.display(), e),
            }
        }
    }
}

/// Content type by file extension, for serving media.
pub fn content_type_for(rel: &str) -> &'static str {
    let ext = Path::new(rel)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use image::{ImageFormat, Rgb, RgbImage};

    #[test]
    fn saves_under_expected_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::open(dir.path(), "/media").unwrap();
        let png = Frame::new(RgbImage::from_pixel(4, 4, Rgb([1, 2, 3])))
            .unwrap()
            .encode(ImageFormat::Png)
            .unwrap();

        let original = media.save_original(&png, 1700000000).unwrap();
        assert!(original.starts_with("detections/1700000000_"));
        assert!(original.ends_with(".png"));
        assert_eq!(media.read(&original).unwrap(), png);

        let processed = media.save_processed(b"jpegbytes", 1700000000).unwrap();
        assert!(processed.starts_with("processed/processed_1700000000_"));
        assert_eq!(media.url(&processed), format!("/media/{}", processed));
    }

    #[test]
    fn uncommitted_batches_remove_only_their_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::open(dir.path(), "/media").unwrap();
        let shared = media.save_processed(b"same bytes", 42).unwrap();

        let (original, processed) = {
            let mut batch = media.batch();
            let original = batch.save_original(b"upload", 42).unwrap();
            let processed = batch.save_processed(b"same bytes", 42).unwrap();
            (original, processed)
        };
        assert_eq!(processed, shared);
        assert!(!media.resolve(&original).unwrap().exists());
        assert!(media.resolve(&shared).unwrap().exists());

        let mut batch = media.batch();
        let kept = batch.save_original(b"upload", 43).unwrap();
        batch.commit();
        assert!(media.resolve(&kept).unwrap().exists());
    }

    #[test]
    fn resolve_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let media = MediaStore::open(dir.path(), "/media/").unwrap();
        assert!(media.resolve("../etc/passwd").is_none());
        assert!(media.resolve("processed/../../x").is_none());
        assert!(media.resolve("/etc/passwd").is_none());
        assert!(media.resolve("").is_none());
        assert!(media.resolve("processed/a.jpg").is_some());
    }

    #[test]
    fn content_types() {
        assert_eq!(content_type_for("a/b.JPG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a"), "application/octet-stream");
    }
}
