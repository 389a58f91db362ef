//! OCR engine abstraction shared by the fast and deep extraction stages.
//!
//! Engines return explicit `Result`s at this boundary. The classification
//! pipeline is the only caller, and it turns every `Err` into an empty
//! [`ExtractionResult`] plus a logged error.

use image::DynamicImage;
use thiserror::Error;

/// Errors from OCR engines.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("Backend not available: {0}")]
    BackendNotAvailable(String),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("OCR timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    ImageError(String),
}

/// Which tier of the pipeline produced a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OcrStage {
    /// Low-cost classical engine, always tried first.
    Fast,
    /// High-cost neural engine, tried only when the fast stage is inconclusive.
    Deep,
}

impl OcrStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrStage::Fast => "fast",
            OcrStage::Deep => "deep",
        }
    }
}

impl std::fmt::Display for OcrStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text produced by one stage for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionResult {
    /// Trimmed text; empty when the engine found nothing or failed.
    pub text: String,
    /// Stage that produced the text.
    pub stage: OcrStage,
}

impl ExtractionResult {
    pub fn new(stage: OcrStage, text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            stage,
        }
    }

    /// An empty result, used when the stage failed or never ran.
    pub fn empty(stage: OcrStage) -> Self {
        Self {
            text: String::new(),
            stage,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Character count (not bytes), as reported in the run log.
    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// An OCR engine wrapped for one pipeline stage.
pub trait TextExtractor: Send + Sync {
    /// Stage this extractor serves.
    fn stage(&self) -> OcrStage;

    /// Short engine name for log lines (e.g. "tesseract").
    fn engine(&self) -> &str;

    /// Recognize text in a decoded image.
    fn extract(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extraction_result_trims_text() {
        let result = ExtractionResult::new(OcrStage::Fast, "  invoice Ex1\n\n");
        assert_eq!(result.text, "invoice Ex1");
        assert!(!result.is_empty());
    }

    #[test]
    fn test_whitespace_only_text_is_empty() {
        let result = ExtractionResult::new(OcrStage::Deep, " \n\t ");
        assert!(result.is_empty());
        assert_eq!(result.char_count(), 0);
    }

    #[test]
    fn test_char_count_counts_characters() {
        let result = ExtractionResult::new(OcrStage::Fast, "café");
        assert_eq!(result.char_count(), 4);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(OcrStage::Fast.to_string(), "fast");
        assert_eq!(OcrStage::Deep.to_string(), "deep");
    }
}
