//! OCR text extraction.
//!
//! Two engines, one per pipeline stage:
//!
//! - **Tesseract**: classical OCR, CPU-based, cheap (fast stage)
//! - **DeepSeek**: vision-language OCR, GPU recommended, expensive (deep stage)
//!
//! Both implement [`TextExtractor`] and receive a decoded image.

mod backend;
mod deepseek;
mod engine_utils;
mod tesseract;

pub use backend::{ExtractionResult, OcrError, OcrStage, TextExtractor};
pub use deepseek::{
    select_device, ComputeDevice, DeepSeekConfig, DeepSeekExtractor, DevicePreference,
};
pub use engine_utils::check_binary;
pub use tesseract::{TesseractConfig, TesseractExtractor};
