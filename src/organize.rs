//! Output materialization: compressed, renamed image copies and OCR sidecars.
//!
//! Matched images land in the output directory as
//! `<suffix>_<marker>_<stem><ext>` next to a `.txt` sidecar with the same
//! stem. Unmatched images only get an `UNMATCHED_<stem>.txt` sidecar.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::pipeline::display_name;

/// Errors writing outputs.
#[derive(Debug, Error)]
pub enum OrganizeError {
    #[error("failed to create output directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode WebP {path}: {reason}")]
    WebP { path: PathBuf, reason: String },

    #[error("source path has no file name: {0}")]
    NoFileName(PathBuf),
}

/// Re-encoding settings for matched image copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Longest side in pixels; larger images are downscaled.
    pub max_dimension: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Lossy WebP quality (0-100).
    pub webp_quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            jpeg_quality: 85,
            webp_quality: 85,
        }
    }
}

/// Writes outputs into a single flat directory.
#[derive(Debug, Clone)]
pub struct Organizer {
    output_dir: PathBuf,
    compression: CompressionConfig,
}

impl Organizer {
    pub fn new(output_dir: impl Into<PathBuf>, compression: CompressionConfig) -> Self {
        Self {
            output_dir: output_dir.into(),
            compression,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Output path for a matched image.
    pub fn matched_image_path(
        &self,
        source: &Path,
        marker: &str,
        suffix: &str,
    ) -> Result<PathBuf, OrganizeError> {
        Ok(self
            .output_dir
            .join(matched_file_name(source, marker, suffix)?))
    }

    /// Output path for an unmatched image's sidecar.
    pub fn unmatched_sidecar_path(&self, source: &Path) -> Result<PathBuf, OrganizeError> {
        let stem = file_stem(source)?;
        Ok(self.output_dir.join(format!("UNMATCHED_{}.txt", stem)))
    }

    /// Compress `source` into the output directory under its matched name.
    pub fn store_matched(
        &self,
        source: &Path,
        marker: &str,
        suffix: &str,
    ) -> Result<PathBuf, OrganizeError> {
        let dest = self.matched_image_path(source, marker, suffix)?;
        self.ensure_output_dir()?;

        let image = image::open(source).map_err(|e| OrganizeError::Open {
            path: source.to_path_buf(),
            source: e,
        })?;
        let rgb = shrink_to_fit(image, self.compression.max_dimension).to_rgb8();
        self.encode(&rgb, &dest)?;

        info!(
            "Compressed and saved: {} -> {}",
            display_name(source),
            display_name(&dest)
        );
        Ok(dest)
    }

    /// Write OCR text to `path` as UTF-8.
    pub fn write_sidecar(&self, path: &Path, text: &str) -> Result<(), OrganizeError> {
        self.ensure_output_dir()?;
        fs::write(path, text).map_err(|e| OrganizeError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Wrote OCR text to {}", path.display());
        Ok(())
    }

    fn ensure_output_dir(&self) -> Result<(), OrganizeError> {
        fs::create_dir_all(&self.output_dir).map_err(|e| OrganizeError::CreateDir {
            path: self.output_dir.clone(),
            source: e,
        })
    }

    fn encode(&self, rgb: &RgbImage, dest: &Path) -> Result<(), OrganizeError> {
        let encode_err = |source| OrganizeError::Encode {
            path: dest.to_path_buf(),
            source,
        };
        let ext = lowercase_extension(dest);

        match ext.as_str() {
            ".jpg" | ".jpeg" => {
                let mut writer = self.create(dest)?;
                let encoder = JpegEncoder::new_with_quality(&mut writer, self.compression.jpeg_quality);
                rgb.write_with_encoder(encoder).map_err(encode_err)
            }
            ".png" => {
                let writer = self.create(dest)?;
                let encoder =
                    PngEncoder::new_with_quality(writer, CompressionType::Best, PngFilter::Adaptive);
                rgb.write_with_encoder(encoder).map_err(encode_err)
            }
            ".webp" => self.encode_webp(rgb, dest),
            _ => {
                let format = ImageFormat::from_path(dest).map_err(encode_err)?;
                rgb.save_with_format(dest, format).map_err(encode_err)
            }
        }
    }

    fn encode_webp(&self, rgb: &RgbImage, dest: &Path) -> Result<(), OrganizeError> {
        let quality = f32::from(self.compression.webp_quality.min(100));
        let encoded = webp::Encoder::from_rgb(rgb.as_raw(), rgb.width(), rgb.height())
            .encode_simple(false, quality)
            .map_err(|e| OrganizeError::WebP {
                path: dest.to_path_buf(),
                reason: format!("{:?}", e),
            })?;
        fs::write(dest, &*encoded).map_err(|e| OrganizeError::Io {
            path: dest.to_path_buf(),
            source: e,
        })
    }

    fn create(&self, dest: &Path) -> Result<BufWriter<File>, OrganizeError> {
        File::create(dest)
            .map(BufWriter::new)
            .map_err(|e| OrganizeError::Io {
                path: dest.to_path_buf(),
                source: e,
            })
    }
}

/// `<suffix>_<marker>_<stem><ext>` with the extension lower-cased.
pub fn matched_file_name(source: &Path, marker: &str, suffix: &str) -> Result<String, OrganizeError> {
    let stem = file_stem(source)?;
    Ok(format!(
        "{}_{}_{}{}",
        suffix,
        marker,
        stem,
        lowercase_extension(source)
    ))
}

fn file_stem(source: &Path) -> Result<String, OrganizeError> {
    source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| OrganizeError::NoFileName(source.to_path_buf()))
}

/// Extension including the dot, lower-cased; empty when there is none.
fn lowercase_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Downscale so the longest side is at most `max_dimension`, keeping the
/// aspect ratio. Smaller images are returned untouched.
fn shrink_to_fit(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let longest = image.width().max(image.height());
    if max_dimension == 0 || longest <= max_dimension {
        return image;
    }
    let ratio = max_dimension as f64 / longest as f64;
    let width = ((image.width() as f64 * ratio) as u32).max(1);
    let height = ((image.height() as f64 * ratio) as u32).max(1);
    debug!(
        "Resizing {}x{} -> {}x{}",
        image.width(),
        image.height(),
        width,
        height
    );
    image.resize_exact(width, height, FilterType::Lanczos3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_image(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn test_matched_file_name_format() {
        let name = matched_file_name(Path::new("/scans/box1/IMG_0042.JPG"), "Ex1", "2025_01_20").unwrap();
        assert_eq!(name, "2025_01_20_Ex1_IMG_0042.jpg");
    }

    #[test]
    fn test_matched_file_name_without_extension() {
        let name = matched_file_name(Path::new("scan"), "Ex2", "s").unwrap();
        assert_eq!(name, "s_Ex2_scan");
    }

    #[test]
    fn test_unmatched_sidecar_path() {
        let organizer = Organizer::new("/out", CompressionConfig::default());
        let path = organizer
            .unmatched_sidecar_path(Path::new("/scans/page 7.TIF"))
            .unwrap();
        assert_eq!(path, PathBuf::from("/out/UNMATCHED_page 7.txt"));
    }

    #[test]
    fn test_store_matched_downscales_large_images() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("Wide.PNG");
        write_image(&source, 2400, 600);

        let organizer = Organizer::new(dir.path().join("out"), CompressionConfig::default());
        let dest = organizer.store_matched(&source, "Ex1", "2025_01_20").unwrap();

        assert_eq!(dest.file_name().unwrap(), "2025_01_20_Ex1_Wide.png");
        let stored = image::open(&dest).unwrap();
        assert_eq!((stored.width(), stored.height()), (1920, 480));
    }

    #[test]
    fn test_store_matched_keeps_small_jpeg_dimensions() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("small.jpeg");
        write_image(&source, 64, 48);

        let organizer = Organizer::new(dir.path().join("out"), CompressionConfig::default());
        let dest = organizer.store_matched(&source, "Ex2", "sfx").unwrap();

        let stored = image::open(&dest).unwrap();
        assert_eq!((stored.width(), stored.height()), (64, 48));
        assert_eq!(image::ImageFormat::from_path(&dest).unwrap(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_store_matched_other_formats() {
        let dir = tempdir().unwrap();
        let organizer = Organizer::new(dir.path().join("out"), CompressionConfig::default());
        for name in ["a.bmp", "b.tiff", "c.webp"] {
            let source = dir.path().join(name);
            write_image(&source, 20, 10);
            let dest = organizer.store_matched(&source, "M", "S").unwrap();
            let stored = image::open(&dest).unwrap();
            assert_eq!((stored.width(), stored.height()), (20, 10), "{}", name);
        }
    }

    #[test]
    fn test_store_matched_webp_is_lossy() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("noisy.webp");
        // Deterministic noise, the worst case for lossless encoding.
        let mut state: u32 = 0x2545_f491;
        let noisy = RgbImage::from_fn(256, 256, |_, _| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            let [a, b, c, _] = state.to_le_bytes();
            image::Rgb([a, b, c])
        });
        noisy.save(&source).unwrap();
        let lossless_size = fs::metadata(&source).unwrap().len();

        let organizer = Organizer::new(dir.path().join("out"), CompressionConfig::default());
        let dest = organizer.store_matched(&source, "Ex1", "s").unwrap();

        assert_eq!(dest.file_name().unwrap(), "s_Ex1_noisy.webp");
        assert!(fs::metadata(&dest).unwrap().len() < lossless_size);
        let stored = image::open(&dest).unwrap();
        assert_eq!((stored.width(), stored.height()), (256, 256));
        assert_ne!(stored.to_rgb8(), noisy);
    }

    #[test]
    fn test_store_matched_reports_undecodable_source() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("broken.jpg");
        fs::write(&source, b"not an image").unwrap();
        let organizer = Organizer::new(dir.path().join("out"), CompressionConfig::default());
        assert!(matches!(
            organizer.store_matched(&source, "Ex1", "s"),
            Err(OrganizeError::Open { .. })
        ));
    }

    #[test]
    fn test_write_sidecar_creates_output_dir() {
        let dir = tempdir().unwrap();
        let organizer = Organizer::new(dir.path().join("a").join("b"), CompressionConfig::default());
        let path = organizer.output_dir().join("x.txt");
        organizer.write_sidecar(&path, "invoice Ex1 paid").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "invoice Ex1 paid");
    }

    #[test]
    fn test_write_sidecar_fails_when_output_dir_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("out");
        fs::write(&blocker, b"").unwrap();
        let organizer = Organizer::new(&blocker, CompressionConfig::default());
        assert!(matches!(
            organizer.write_sidecar(&blocker.join("x.txt"), "text"),
            Err(OrganizeError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_shrink_to_fit_preserves_aspect() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(1000, 4000));
        let shrunk = shrink_to_fit(img, 1920);
        assert_eq!((shrunk.width(), shrunk.height()), (480, 1920));
    }
}
