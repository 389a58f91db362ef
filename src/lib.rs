//! scansort - sort scanned images by markers found in their text.
//!
//! Each image goes through a cheap OCR pass first and, only when that pass is
//! inconclusive, an expensive vision-language pass. Recognized text is matched
//! against an ordered marker -> suffix table; matched images are copied into a
//! flat output folder under a classified name with their text alongside.

pub mod batch;
pub mod config;
pub mod ocr;
pub mod organize;
pub mod patterns;
pub mod pipeline;
pub mod scan;
