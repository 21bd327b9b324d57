//! Thumbnail generation and image probing.
//!
//! Thumbnails are content-addressed: `<root>/<fp[0..2]>/<fp>.webp`. The
//! source is decoded, rotated per its EXIF orientation, shrunk to fit inside
//! [`MAX_EDGE`] on both axes and re-encoded as WebP. Decoding and encoding
//! run on the blocking pool.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};

use crate::error::{Error, Result};

pub const MAX_EDGE: u32 = 1280;

#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    root: PathBuf,
}

impl ThumbnailGenerator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the thumbnail for `fingerprint` lives.
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        let shard = fingerprint.get(..2).unwrap_or(fingerprint);
        self.root
            .join(shard)
            .join(format!("{fingerprint}.webp"))
    }

    /// Render the thumbnail for `source` and return its path.
    ///
    /// An existing thumbnail at the target path is overwritten.
    pub async fn generate(&self, source: &Path, fingerprint: &str) -> Result<PathBuf> {
        let target = self.path_for(fingerprint);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let source = source.to_path_buf();
        let out = target.clone();
        tokio::task::spawn_blocking(move || render(&source, &out))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;

        Ok(target)
    }

    /// Delete a thumbnail file. A missing file is not an error.
    pub async fn remove(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn render(source: &Path, target: &Path) -> Result<()> {
    let mut decoder = ImageReader::open(source)?
        .with_guessed_format()?
        .into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut img = DynamicImage::from_decoder(decoder)?;
    img.apply_orientation(orientation);

    if img.width() > MAX_EDGE || img.height() > MAX_EDGE {
        img = img.resize(MAX_EDGE, MAX_EDGE, FilterType::Lanczos3);
    }

    // The WebP encoder takes 8-bit RGB(A) only
    let img = DynamicImage::ImageRgba8(img.to_rgba8());
    img.save_with_format(target, ImageFormat::WebP)?;
    Ok(())
}

/// Read the stored pixel dimensions without decoding the whole image.
///
/// Fails with [`Error::InvalidImage`] when the header is unreadable or
/// either side is zero.
pub async fn probe_dimensions(path: &Path) -> Result<(u32, u32)> {
    let owned = path.to_path_buf();
    let probed = tokio::task::spawn_blocking(move || -> image::ImageResult<(u32, u32)> {
        ImageReader::open(&owned)?
            .with_guessed_format()?
            .into_dimensions()
    })
    .await
    .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    match probed {
        Ok((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        Ok((w, h)) => Err(Error::InvalidImage {
            path: path.to_path_buf(),
            reason: format!("degenerate dimensions {w}x{h}"),
        }),
        Err(e) => Err(Error::InvalidImage {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}
