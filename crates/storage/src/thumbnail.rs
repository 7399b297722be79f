//! Derives and caches a scaled artifact from an original image
//! (`spec.md` §4.6). The decode/resize step is a pure collaborator behind
//! the [`ImageResizer`] trait; [`ImageCrateResizer`] is the one concrete
//! implementation, built on the `image` crate the way the retrieval pack's
//! `Dicklesworthstone-ultrasearch` example uses it for thumbnailing.

use std::sync::Arc;

use common::StorageError;
use image::imageops::FilterType;
use image::GenericImageView;

use crate::engine::BlobEngine;

pub struct ResizedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

pub trait ImageResizer: Send + Sync {
    fn resize(&self, bytes: &[u8], target: (u32, u32)) -> Result<ResizedImage, StorageError>;
}

/// Resizes with `image::DynamicImage::resize`, which already fits the
/// source into the target bounding box while preserving aspect ratio
/// (§4.6 step 4's "short side matches when square ... scale the longer
/// axis" rule). JPEG sources stay JPEG; every other decoded format
/// (including GIF) re-encodes as PNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateResizer;

impl ImageResizer for ImageCrateResizer {
    fn resize(&self, bytes: &[u8], target: (u32, u32)) -> Result<ResizedImage, StorageError> {
        let format = image::guess_format(bytes).map_err(|e| StorageError::unsupported_media(e.to_string()))?;
        let decoded = image::load_from_memory(bytes).map_err(|e| StorageError::unsupported_media(e.to_string()))?;

        let resized = decoded.resize(target.0, target.1, FilterType::Triangle);
        let (width, height) = resized.dimensions();

        let (out_format, mime) = if format == image::ImageFormat::Jpeg {
            (image::ImageFormat::Jpeg, "image/jpeg")
        } else {
            (image::ImageFormat::Png, "image/png")
        };

        let mut out = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut out), out_format)
            .map_err(|e| StorageError::unsupported_media(e.to_string()))?;

        Ok(ResizedImage {
            bytes: out,
            mime: mime.to_string(),
            width,
            height,
        })
    }
}

/// Wraps a [`BlobEngine`] with the thumbnail-materialization algorithm.
/// Tolerates duplicate concurrent renders (T1): `write_file`'s
/// `overwrite=false` guard is the single commit point, and a losing racer
/// still serves the bytes it just rendered.
pub struct ThumbnailCache<'a> {
    engine: &'a BlobEngine,
    allowed_sizes: &'a [(u32, u32)],
    resizer: Arc<dyn ImageResizer>,
}

impl<'a> ThumbnailCache<'a> {
    pub fn new(
        engine: &'a BlobEngine,
        allowed_sizes: &'a [(u32, u32)],
        resizer: Arc<dyn ImageResizer>,
    ) -> Self {
        ThumbnailCache {
            engine,
            allowed_sizes,
            resizer,
        }
    }

    pub fn read(&self, requested_path: &str) -> Result<(String, String, Vec<u8>), StorageError> {
        let Some((origin, w, h)) = common::split_thumbnail_suffix(requested_path) else {
            return self.engine.read_file(requested_path);
        };

        if !self.allowed_sizes.contains(&(w, h)) {
            return Err(StorageError::bad_thumbnail(format!("{w}x{h}")));
        }
        let derived = common::derived_path(origin, w, h);

        // Step 1: exact derived path already materialized.
        if let Ok(materialized) = self.engine.read_file(&derived) {
            return Ok(materialized);
        }

        // Step 2: load the original; propagate not_exist as-is.
        let (origin_mime, origin_metadata, origin_bytes) = self.engine.read_file(origin)?;

        // Step 3: original already within the target rectangle.
        let already_fits = common::parse_wxh(&origin_metadata)
            .map(|(ow, oh)| ow <= w && oh <= h)
            .unwrap_or(false);
        if already_fits {
            return Ok((origin_mime, origin_metadata, origin_bytes));
        }

        // Step 4: resize.
        let resized = self.resizer.resize(&origin_bytes, (w, h))?;
        let rendered_metadata = format!("{}x{}", resized.width, resized.height);

        // Step 5: persist, swallowing a losing race.
        match self
            .engine
            .write_file(&derived, &resized.mime, &rendered_metadata, &resized.bytes, false)
        {
            Ok(()) => {}
            Err(StorageError::Exists { .. }) => {
                tracing::debug!(path = %derived, "thumbnail: lost materialization race");
            }
            Err(e) => return Err(e),
        }

        Ok((resized.mime, rendered_metadata, resized.bytes))
    }
}
