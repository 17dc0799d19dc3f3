//! Upload processing: resize to a fixed box and store as JPEG under the
//! public directory.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

/// Maximum input file size for image processing (10 MB).
pub const MAX_INPUT_SIZE: usize = 10 * 1024 * 1024;

/// Maximum concurrent resize operations.
const MAX_CONCURRENT_PROCESSING: usize = 4;

/// JPEG quality of stored uploads.
const JPEG_QUALITY: u8 = 90;

/// Target box for a stored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

pub const USER_PHOTO_SIZE: ImageSize = ImageSize {
    width: 500,
    height: 500,
};

pub const TOUR_IMAGE_SIZE: ImageSize = ImageSize {
    width: 2000,
    height: 1333,
};

/// Public sub-directory for user photos.
pub const USER_IMAGE_DIR: &str = "img/users";

/// Public sub-directory for tour images.
pub const TOUR_IMAGE_DIR: &str = "img/tours";

/// Resizes uploads and writes them under the public directory.
#[derive(Clone)]
pub struct ImageService {
    public_dir: PathBuf,
    processing_semaphore: Arc<Semaphore>,
}

impl ImageService {
    pub fn new(public_dir: &Path) -> Self {
        Self {
            public_dir: public_dir.to_path_buf(),
            processing_semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT_PROCESSING)),
        }
    }

    /// Resize `bytes` into `size`, store it as `dir/filename` and return the
    /// filename.
    pub async fn store(
        &self,
        bytes: Vec<u8>,
        size: ImageSize,
        dir: &str,
        filename: String,
    ) -> Result<String> {
        let jpeg = {
            let _permit = self
                .processing_semaphore
                .acquire()
                .await
                .context("image processing semaphore closed")?;
            tokio::task::spawn_blocking(move || resize_to_jpeg(&bytes, size))
                .await
                .context("image processing task panicked")??
        };

        let target_dir = self.public_dir.join(dir);
        tokio::fs::create_dir_all(&target_dir)
            .await
            .with_context(|| format!("failed to create {}", target_dir.display()))?;

        let path = target_dir.join(&filename);
        tokio::fs::write(&path, &jpeg)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;

        debug!(path = %path.display(), bytes = jpeg.len(), "stored image");
        Ok(filename)
    }
}

impl std::fmt::Debug for ImageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageService")
            .field("public_dir", &self.public_dir)
            .finish_non_exhaustive()
    }
}

/// Crop-to-fill `bytes` into `size` and encode as JPEG.
pub fn resize_to_jpeg(bytes: &[u8], size: ImageSize) -> Result<Vec<u8>> {
    if bytes.len() > MAX_INPUT_SIZE {
        anyhow::bail!(
            "image too large: {} bytes (max {} bytes)",
            bytes.len(),
            MAX_INPUT_SIZE
        );
    }

    let img = image::load_from_memory(bytes).context("failed to load image")?;
    let resized = img.resize_to_fill(size.width, size.height, FilterType::Lanczos3);
    let rgb = resized.to_rgb8();

    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY)
        .encode_image(&rgb)
        .context("failed to encode JPEG")?;

    Ok(buf.into_inner())
}

/// `user-<id>-<millis>.jpeg`
pub fn user_photo_filename(user_id: Uuid) -> String {
    format!("user-{user_id}-{}.jpeg", chrono::Utc::now().timestamp_millis())
}

/// `tour-<id>-<millis>-cover.jpeg`
pub fn tour_cover_filename(tour_id: Uuid) -> String {
    format!(
        "tour-{tour_id}-{}-cover.jpeg",
        chrono::Utc::now().timestamp_millis()
    )
}

/// `tour-<id>-<millis>-<n>.jpeg`, numbered from 1.
pub fn tour_image_filename(tour_id: Uuid, index: usize) -> String {
    format!(
        "tour-{tour_id}-{}-{}.jpeg",
        chrono::Utc::now().timestamp_millis(),
        index + 1
    )
}
