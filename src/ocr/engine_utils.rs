//! Shared utilities for subprocess-backed OCR engines.
//!
//! Provides common functionality for:
//! - Locating engine binaries
//! - Handing decoded images to an engine through a scratch file

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat};
use tempfile::NamedTempFile;

use super::backend::OcrError;

/// Check if a binary is available in PATH.
pub fn check_binary(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Resolve an engine binary given either a bare name or a path.
///
/// Bare names are looked up in PATH; anything with a directory component must
/// exist on disk.
pub fn resolve_binary(binary: &Path) -> Option<PathBuf> {
    if binary.components().count() > 1 {
        return binary.is_file().then(|| binary.to_path_buf());
    }
    which::which(binary).ok()
}

/// Write a decoded image to a temporary PNG for an engine that reads files.
///
/// The file is removed when the returned handle is dropped.
pub fn write_scratch_png(image: &DynamicImage) -> Result<NamedTempFile, OcrError> {
    let scratch = tempfile::Builder::new()
        .prefix("scansort-")
        .suffix(".png")
        .tempfile()?;

    // Engines expect 8-bit RGB; float or 16-bit buffers are narrowed here.
    DynamicImage::ImageRgb8(image.to_rgb8())
        .save_with_format(scratch.path(), ImageFormat::Png)
        .map_err(|e| OcrError::ImageError(format!("failed to write scratch image: {}", e)))?;

    Ok(scratch)
}

/// Collapse process output to trimmed UTF-8 text.
pub fn stdout_text(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout).trim().to_string()
}

/// Short stderr excerpt for error messages.
pub fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().nth(300) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
