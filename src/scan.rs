//! Recursive discovery of candidate image files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Extensions (lower-case, without the dot) treated as images.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Prefix of macOS resource-fork sidecars (e.g. `._scan.jpg`).
const METADATA_PREFIX: &str = "._";

/// Whether `path` has a supported image extension (case-insensitive).
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Whether the file name marks an OS-generated metadata file.
pub fn is_os_metadata(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with(METADATA_PREFIX))
        .unwrap_or(false)
}

/// Recursively find all images under `root`, sorted by path.
///
/// Unreadable subdirectories are logged and skipped. Directory symlinks are
/// not followed.
pub fn find_images(root: &Path) -> io::Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("folder {} does not exist", root.display()),
        ));
    }

    let mut images = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e),
            Err(e) => {
                warn!("Skipping unreadable folder {}: {}", dir.display(), e);
                continue;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(file_type) = entry.file_type() else {
                continue;
            };

            if file_type.is_dir() {
                pending.push(path);
            } else if is_os_metadata(&path) {
                continue;
            } else if (file_type.is_file() || (file_type.is_symlink() && path.is_file()))
                && is_supported_image(&path)
            {
                images.push(path);
            }
        }
    }

    images.sort();
    info!("Found {} images", images.len());
    Ok(images)
}
