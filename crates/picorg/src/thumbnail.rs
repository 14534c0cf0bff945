//! Display thumbnails and dimension probing.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use thiserror::Error;

use crate::hash::Fingerprint;
use crate::store::Dimensions;

/// Default bounding box for thumbnails (square).
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 300;

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error("Failed to decode image '{path}': {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Failed to encode thumbnail '{path}': {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Thumbnail IO error for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Writes JPEG thumbnails named after the content fingerprint, so identical
/// files share one thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnailer {
    dir: PathBuf,
    max_size: u32,
}

impl Thumbnailer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_size: DEFAULT_THUMBNAIL_SIZE,
        }
    }

    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(format!("{}.jpg", fingerprint.as_str()))
    }

    /// Generates the thumbnail for `source` unless it already exists.
    pub fn generate(
        &self,
        source: &Path,
        fingerprint: &Fingerprint,
    ) -> Result<PathBuf, ThumbnailError> {
        let target = self.path_for(fingerprint);
        if target.exists() {
            return Ok(target);
        }

        fs::create_dir_all(&self.dir).map_err(|e| ThumbnailError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let img = image::open(source).map_err(|e| ThumbnailError::Decode {
            path: source.to_path_buf(),
            source: e,
        })?;
        // JPEG has no alpha channel.
        let thumb = DynamicImage::ImageRgb8(img.thumbnail(self.max_size, self.max_size).to_rgb8());

        // Write under a unique name and rename, so concurrent workers never
        // expose a half-written file.
        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", fingerprint.short(), uuid::Uuid::new_v4()));
        thumb
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .map_err(|e| ThumbnailError::Encode {
                path: tmp.clone(),
                source: e,
            })?;
        fs::rename(&tmp, &target).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            ThumbnailError::Io {
                path: target.clone(),
                source: e,
            }
        })?;

        log::debug!("Thumbnail written: {}", target.display());
        Ok(target)
    }
}

/// Reads the pixel dimensions from the image header without decoding it.
pub fn probe_dimensions(path: &Path) -> Result<Dimensions, ThumbnailError> {
    let (width, height) = image::image_dimensions(path).map_err(|e| ThumbnailError::Decode {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(Dimensions { width, height })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HashComputer;
    use image::{Rgba, RgbaImage};
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let img = RgbaImage::from_pixel(w, h, Rgba([200, 30, 30, 128]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_probe_dimensions() {
        let dir = TempDir::new().unwrap();
        let path = write_png(dir.path(), "a.png", 40, 20);
        assert_eq!(
            probe_dimensions(&path).unwrap(),
            Dimensions {
                width: 40,
                height: 20
            }
        );
    }

    #[test]
    fn test_probe_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fake.jpg");
        fs::write(&path, b"not an image").unwrap();
        assert!(matches!(
            probe_dimensions(&path),
            Err(ThumbnailError::Decode { .. })
        ));
    }

    #[test]
    fn test_generate_bounds_size_and_reuses_file() {
        let dir = TempDir::new().unwrap();
        let source = write_png(dir.path(), "big.png", 800, 400);
        let fingerprint = HashComputer::new().hash(&source).unwrap();

        let thumbnailer = Thumbnailer::new(dir.path().join("thumbs")).with_max_size(100);
        let thumb = thumbnailer.generate(&source, &fingerprint).unwrap();
        assert_eq!(thumb, thumbnailer.path_for(&fingerprint));

        let (w, h) = image::image_dimensions(&thumb).unwrap();
        assert_eq!((w, h), (100, 50));

        let modified = fs::metadata(&thumb).unwrap().modified().unwrap();
        let again = thumbnailer.generate(&source, &fingerprint).unwrap();
        assert_eq!(again, thumb);
        assert_eq!(fs::metadata(&again).unwrap().modified().unwrap(), modified);

        let leftovers: Vec<_> = fs::read_dir(thumbnailer.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
