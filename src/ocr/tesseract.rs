//! Tesseract OCR backend implementation (the fast stage).
//!
//! Uses Tesseract via command-line, configured for a single uniform block of
//! printed text with the LSTM engine only.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::backend::{OcrError, OcrStage, TextExtractor};
use super::engine_utils::{resolve_binary, stderr_excerpt, stdout_text, write_scratch_png};

/// OEM 1: LSTM only (accuracy over speed).
const ENGINE_MODE: &str = "1";
/// PSM 6: assume a single uniform block of text.
const PAGE_SEGMENTATION_MODE: &str = "6";

/// Settings for the Tesseract engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseractConfig {
    /// Binary name (looked up in PATH) or path.
    pub binary: PathBuf,
    /// Language for OCR (e.g., "eng", "deu+eng").
    pub language: String,
    /// Custom tessdata directory, exported as TESSDATA_PREFIX to the engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            language: "eng".to_string(),
            tessdata_dir: None,
        }
    }
}

/// Tesseract OCR backend.
#[derive(Debug)]
pub struct TesseractExtractor {
    binary: PathBuf,
    config: TesseractConfig,
}

impl TesseractExtractor {
    /// Create the extractor, failing if the engine binary cannot be found.
    pub fn new(config: TesseractConfig) -> Result<Self, OcrError> {
        let binary = resolve_binary(&config.binary).ok_or_else(|| {
            OcrError::BackendNotAvailable(format!(
                "{} not found (install tesseract-ocr)",
                config.binary.display()
            ))
        })?;

        if let Some(ref dir) = config.tessdata_dir {
            debug!("Using custom tessdata directory: {}", dir.display());
        }

        Ok(Self { binary, config })
    }

    /// Whether the configured binary can be found.
    pub fn is_available(config: &TesseractConfig) -> bool {
        resolve_binary(&config.binary).is_some()
    }

    /// Hint for the operator when the engine is missing.
    pub fn availability_hint(config: &TesseractConfig) -> String {
        if Self::is_available(config) {
            "Tesseract is available".to_string()
        } else {
            "Tesseract not installed. Install with: apt install tesseract-ocr (or brew install tesseract)"
                .to_string()
        }
    }

    fn command_args(&self, image_path: &Path) -> Vec<OsString> {
        vec![
            image_path.as_os_str().to_os_string(),
            "stdout".into(),
            "-l".into(),
            self.config.language.clone().into(),
            "--oem".into(),
            ENGINE_MODE.into(),
            "--psm".into(),
            PAGE_SEGMENTATION_MODE.into(),
        ]
    }

    /// Run Tesseract on an image file.
    fn run_tesseract(&self, image_path: &Path) -> Result<String, OcrError> {
        let mut command = Command::new(&self.binary);
        command.args(self.command_args(image_path));
        if let Some(ref dir) = self.config.tessdata_dir {
            command.env("TESSDATA_PREFIX", dir);
        }

        match command.output() {
            Ok(output) => {
                if output.status.success() {
                    Ok(stdout_text(&output.stdout))
                } else {
                    Err(OcrError::OcrFailed(format!(
                        "tesseract failed: {}",
                        stderr_excerpt(&output.stderr)
                    )))
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(OcrError::BackendNotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Err(e) => Err(OcrError::Io(e)),
        }
    }
}

impl TextExtractor for TesseractExtractor {
    fn stage(&self) -> OcrStage {
        OcrStage::Fast
    }

    fn engine(&self) -> &str {
        "tesseract"
    }

    fn extract(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let scratch = write_scratch_png(image)?;
        self.run_tesseract(scratch.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(config: TesseractConfig) -> TesseractExtractor {
        TesseractExtractor {
            binary: PathBuf::from("tesseract"),
            config,
        }
    }

    #[test]
    fn test_args_use_block_layout_and_lstm() {
        let args = extractor(TesseractConfig::default()).command_args(Path::new("/tmp/a.png"));
        let args: Vec<String> = args
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            ["/tmp/a.png", "stdout", "-l", "eng", "--oem", "1", "--psm", "6"]
        );
    }

    #[test]
    fn test_args_carry_language() {
        let config = TesseractConfig {
            language: "deu+eng".to_string(),
            ..Default::default()
        };
        let args = extractor(config).command_args(Path::new("x.png"));
        assert!(args.iter().any(|a| a == "deu+eng"));
    }

    #[test]
    fn test_missing_binary_is_not_available() {
        let config = TesseractConfig {
            binary: PathBuf::from("/nonexistent/bin/tesseract"),
            ..Default::default()
        };
        assert!(!TesseractExtractor::is_available(&config));
        assert!(matches!(
            TesseractExtractor::new(config),
            Err(OcrError::BackendNotAvailable(_))
        ));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: TesseractConfig = toml::from_str("language = \"fra\"").unwrap();
        assert_eq!(config.language, "fra");
        assert_eq!(config.binary, PathBuf::from("tesseract"));
        assert!(config.tessdata_dir.is_none());
    }

    #[cfg(unix)]
    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_tessdata_dir_reaches_child_only() {
        let dir = tempfile::tempdir().unwrap();
        let tessdata = dir.path().join("tessdata");
        let before = std::env::var_os("TESSDATA_PREFIX");

        let mut tesseract = extractor(TesseractConfig {
            tessdata_dir: Some(tessdata.clone()),
            ..Default::default()
        });
        tesseract.binary = script(dir.path(), "tesseract", "echo \"$TESSDATA_PREFIX\"");

        let text = tesseract.run_tesseract(Path::new("x.png")).unwrap();
        assert_eq!(text, tessdata.to_string_lossy());
        assert_eq!(std::env::var_os("TESSDATA_PREFIX"), before);
    }

    #[cfg(unix)]
    #[test]
    fn test_returns_trimmed_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut tesseract = extractor(TesseractConfig::default());
        tesseract.binary = script(dir.path(), "tesseract", "printf '\\n  Ex1 memo \\n\\n'");
        assert_eq!(tesseract.run_tesseract(Path::new("x.png")).unwrap(), "Ex1 memo");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut tesseract = extractor(TesseractConfig::default());
        tesseract.binary = script(
            dir.path(),
            "tesseract",
            "echo 'Error opening data file eng.traineddata' >&2; exit 1",
        );
        match tesseract.run_tesseract(Path::new("x.png")) {
            Err(OcrError::OcrFailed(msg)) => assert!(msg.contains("eng.traineddata"), "{}", msg),
            other => panic!("expected OcrFailed, got {:?}", other),
        }
    }
}
