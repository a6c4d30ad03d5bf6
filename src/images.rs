use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageEncoder};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::now_millis;

pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 2 * 1024 * 1024;
const JPEG_QUALITY: u8 = 85;

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("image decodes to {bytes} bytes, over the {limit} byte limit")]
    TooLarge { bytes: u64, limit: u64 },
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image worker failed: {0}")]
    Worker(String),
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Copies the picture at `source` into storage as `file_name` and returns
    /// the stored path.
    async fn save(&self, source: &Path, file_name: &str) -> Result<PathBuf, ImageError>;

    /// Best-effort removal; failures are logged, never returned.
    async fn delete(&self, path: &Path);
}

pub struct LocalImageStore {
    dir: PathBuf,
    max_decoded_bytes: u64,
}

impl LocalImageStore {
    pub fn new(dir: impl Into<PathBuf>, max_decoded_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_decoded_bytes,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn save(&self, source: &Path, file_name: &str) -> Result<PathBuf, ImageError> {
        let source = source.to_path_buf();
        let target = self.dir.join(file_name);
        let limit = self.max_decoded_bytes;

        let stored = tokio::task::spawn_blocking(move || {
            store_image(&source, &target, limit)?;
            Ok::<_, ImageError>(target)
        })
        .await
        .map_err(|err| ImageError::Worker(err.to_string()))??;

        debug!(path = %stored.display(), "Stored note image");
        Ok(stored)
    }

    async fn delete(&self, path: &Path) {
        match tokio::fs::remove_file(path).await {
            Ok(()) => debug!(path = %path.display(), "Deleted note image"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "Could not delete note image"),
        }
    }
}

/// File name for a newly stored picture.
pub fn generate_file_name() -> String {
    format!(
        "note_image_{}_{}.jpg",
        now_millis(),
        Uuid::new_v4().simple()
    )
}

fn store_image(source: &Path, target: &Path, limit: u64) -> Result<(), ImageError> {
    let img = image::open(source)?;
    let decoded = u64::from(img.width()) * u64::from(img.height()) * 4;
    if decoded > limit {
        return Err(ImageError::TooLarge {
            bytes: decoded,
            limit,
        });
    }

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let rgb = img.to_rgb8();
    let file = File::create(target)?;
    if let Err(err) = encode_jpeg(&rgb, file) {
        let _ = std::fs::remove_file(target);
        return Err(err);
    }
    Ok(())
}

/// Encodes `rgb` into `out` and flushes it. A failure at either step leaves
/// partial output behind for the caller to discard.
fn encode_jpeg(rgb: &image::RgbImage, out: impl Write) -> Result<(), ImageError> {
    let mut writer = BufWriter::new(out);
    JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ColorType::Rgb8.into(),
    )?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let path = dir.join(name);
        RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 255]))
            .save(&path)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn saves_small_image_as_jpeg() {
        let source_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        let source = write_png(source_dir.path(), "pick.png", 64, 48);
        let store = LocalImageStore::new(store_dir.path().join("images"), DEFAULT_MAX_IMAGE_BYTES);

        let stored = store.save(&source, "note_image_1.jpg").await.unwrap();
        assert_eq!(stored, store.dir().join("note_image_1.jpg"));

        let reloaded = image::open(&stored).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (64, 48));
    }

    #[tokio::test]
    async fn rejects_image_over_decoded_limit() {
        let source_dir = tempfile::tempdir().unwrap();
        let store_dir = tempfile::tempdir().unwrap();
        // 1024 * 1024 * 4 bytes decoded = 4 MiB
        let source = write_png(source_dir.path(), "huge.png", 1024, 1024);
        let store = LocalImageStore::new(store_dir.path(), DEFAULT_MAX_IMAGE_BYTES);

        let err = store.save(&source, "big.jpg").await.unwrap_err();
        assert!(matches!(err, ImageError::TooLarge { limit, .. } if limit == DEFAULT_MAX_IMAGE_BYTES));
        assert!(!store_dir.path().join("big.jpg").exists());
    }

    #[tokio::test]
    async fn missing_source_is_an_error() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(store_dir.path(), DEFAULT_MAX_IMAGE_BYTES);
        let result = store
            .save(&store_dir.path().join("nope.png"), "x.jpg")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalImageStore::new(dir.path(), DEFAULT_MAX_IMAGE_BYTES);
        let path = write_png(dir.path(), "old.png", 4, 4);

        store.delete(&path).await;
        assert!(!path.exists());
        // second delete hits a missing file and stays quiet
        store.delete(&path).await;
    }

    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::other("device full"))
        }
    }

    #[test]
    fn flush_failure_is_reported() {
        let rgb = image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]));
        let err = encode_jpeg(&rgb, FailingFlush).unwrap_err();
        assert!(matches!(err, ImageError::Io(_)));
        assert!(err.to_string().contains("device full"));
    }

    #[test]
    fn generated_names_do_not_collide() {
        let first = generate_file_name();
        let second = generate_file_name();
        assert!(first.starts_with("note_image_"));
        assert!(first.ends_with(".jpg"));
        assert_ne!(first, second);
    }
}
