//! Two-stage classification pipeline.
//!
//! Per image:
//!
//! ```text
//! FAST_PENDING -> FAST_DONE -> MATCHED
//!                           \-> DEEP_PENDING -> DEEP_DONE -> MATCHED
//!                                                         \-> UNMATCHED
//! ```
//!
//! The deep extractor only runs when the fast stage produced no text or text
//! that matches no marker. Extraction failures never escape this module: they
//! are logged and treated as empty text.

use std::path::Path;

use image::DynamicImage;
use tracing::{error, info, info_span, warn};

use crate::ocr::{ExtractionResult, OcrStage, TextExtractor};
use crate::patterns::{PatternMatch, PatternMatcher, PatternTable};

/// Number of characters shown in the per-image text preview.
const PREVIEW_CHARS: usize = 120;

/// Why an image ended up unmatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmatchedReason {
    /// Neither stage produced any text.
    NoText,
    /// Text was found but no marker occurs in it.
    NoPatternMatched,
}

impl UnmatchedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnmatchedReason::NoText => "no text",
            UnmatchedReason::NoPatternMatched => "no pattern matched",
        }
    }
}

/// Terminal classification decision for one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    Matched {
        marker: String,
        suffix: String,
        source: OcrStage,
    },
    NoMatch {
        reason: UnmatchedReason,
    },
}

impl MatchOutcome {
    fn matched(found: PatternMatch, source: OcrStage) -> Self {
        MatchOutcome::Matched {
            marker: found.marker,
            suffix: found.suffix,
            source,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Outcome plus the text that backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: MatchOutcome,
    /// Text from the stage that decided the outcome; for unmatched images,
    /// the most recent non-empty stage text.
    pub text: String,
    /// Stage whose text is reported in `text`.
    pub text_source: OcrStage,
}

/// Orchestrates the fast and deep extractors against a pattern table.
pub struct ClassificationPipeline {
    fast: Box<dyn TextExtractor>,
    deep: Box<dyn TextExtractor>,
    matcher: PatternMatcher,
}

impl ClassificationPipeline {
    pub fn new(
        fast: Box<dyn TextExtractor>,
        deep: Box<dyn TextExtractor>,
        patterns: &PatternTable,
    ) -> Self {
        Self {
            fast,
            deep,
            matcher: PatternMatcher::new(patterns),
        }
    }

    /// Decode and classify an image file.
    ///
    /// An undecodable file is logged and reported as unmatched with no text;
    /// neither engine is invoked for it.
    pub fn classify_path(&self, path: &Path) -> Classification {
        let label = display_name(path);
        match image::open(path) {
            Ok(image) => self.classify(&image, &label),
            Err(e) => {
                error!("Failed to decode {}: {}", label, e);
                Classification {
                    outcome: MatchOutcome::NoMatch {
                        reason: UnmatchedReason::NoText,
                    },
                    text: String::new(),
                    text_source: OcrStage::Fast,
                }
            }
        }
    }

    /// Classify a decoded image. `label` names the image in log lines.
    pub fn classify(&self, image: &DynamicImage, label: &str) -> Classification {
        let _span = info_span!("classify", image = %label).entered();

        let fast = self.run_stage(self.fast.as_ref(), image, label);
        if !fast.is_empty() {
            if let Some(found) = self.matcher.find(&fast.text) {
                return self.finish_matched(found, fast, label);
            }
        }

        info!(
            "No match with {} on {}. Falling back to {}...",
            self.fast.engine(),
            label,
            self.deep.engine()
        );
        let deep = self.run_stage(self.deep.as_ref(), image, label);

        if deep.is_empty() {
            if fast.is_empty() {
                warn!("No text detected in {} by either OCR stage", label);
                return Classification {
                    outcome: MatchOutcome::NoMatch {
                        reason: UnmatchedReason::NoText,
                    },
                    text: String::new(),
                    text_source: OcrStage::Deep,
                };
            }
            info!(
                "No text from {} on {}; keeping {} text",
                self.deep.engine(),
                label,
                self.fast.engine()
            );
            return self.finish_unmatched(fast, label);
        }

        if let Some(found) = self.matcher.find(&deep.text) {
            return self.finish_matched(found, deep, label);
        }
        self.finish_unmatched(deep, label)
    }

    /// Run one stage, absorbing failure into an empty result.
    fn run_stage(
        &self,
        extractor: &dyn TextExtractor,
        image: &DynamicImage,
        label: &str,
    ) -> ExtractionResult {
        let stage = extractor.stage();
        let result = match extractor.extract(image) {
            Ok(text) => ExtractionResult::new(stage, text),
            Err(e) => {
                error!("{} error on {}: {}", extractor.engine(), label, e);
                ExtractionResult::empty(stage)
            }
        };
        info!(
            "({}) Extracted {} chars from {}",
            extractor.engine(),
            result.char_count(),
            label
        );
        result
    }

    fn finish_matched(
        &self,
        found: PatternMatch,
        result: ExtractionResult,
        label: &str,
    ) -> Classification {
        let engine = self.engine_for(result.stage);
        info!("({}) Text preview [{}]: {}", engine, label, preview(&result.text));
        info!("Match '{}' found in {} via {}", found.marker, label, engine);
        Classification {
            outcome: MatchOutcome::matched(found, result.stage),
            text: result.text,
            text_source: result.stage,
        }
    }

    fn finish_unmatched(&self, result: ExtractionResult, label: &str) -> Classification {
        let engine = self.engine_for(result.stage);
        info!("({}) Text preview [{}]: {}", engine, label, preview(&result.text));
        info!("No matching pattern found for {} even after fallback", label);
        Classification {
            outcome: MatchOutcome::NoMatch {
                reason: UnmatchedReason::NoPatternMatched,
            },
            text: result.text,
            text_source: result.stage,
        }
    }

    fn engine_for(&self, stage: OcrStage) -> &str {
        match stage {
            OcrStage::Fast => self.fast.engine(),
            OcrStage::Deep => self.deep.engine(),
        }
    }
}

/// File name of `path` for log lines, or the whole path if it has none.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One-line preview of OCR text, truncated on a character boundary.
pub fn preview(text: &str) -> String {
    let flat = text.replace(['\r', '\n'], " ");
    match flat.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}
