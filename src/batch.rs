//! Batch run: classify every discovered image and materialize the outcome.

use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::organize::{OrganizeError, Organizer};
use crate::pipeline::{
    display_name, Classification, ClassificationPipeline, MatchOutcome, UnmatchedReason,
};

/// Receives per-image progress events. Produces nothing the run depends on.
pub trait BatchObserver {
    fn image_started(&self, _path: &Path) {}
    fn image_finished(&self, _path: &Path, _classification: &Classification) {}
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Aggregate counts for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Images handed to the run.
    pub found: usize,
    /// Images whose outcome was fully written.
    pub processed: usize,
    /// Matched images whose compressed copy was written.
    pub organized: usize,
    /// Unmatched because no stage produced text.
    pub unmatched_no_text: usize,
    /// Unmatched although text was found.
    pub unmatched_no_pattern: usize,
    /// Images with at least one failed output write.
    pub write_failures: usize,
}

impl RunSummary {
    fn log(&self, output_dir: &Path) {
        info!("--- Processing complete! ---");
        info!("Images found: {}", self.found);
        info!("Images processed: {}", self.processed);
        info!("Images organized: {}", self.organized);
        info!(
            "Unmatched: {} without text, {} without a pattern match",
            self.unmatched_no_text, self.unmatched_no_pattern
        );
        if self.write_failures > 0 {
            warn!("Images with failed writes: {}", self.write_failures);
        }
        info!("Output directory: {}", output_dir.display());
    }
}

/// Classify and organize `images` one after another.
pub fn run_batch(
    images: &[PathBuf],
    pipeline: &ClassificationPipeline,
    organizer: &Organizer,
    observer: &dyn BatchObserver,
) -> RunSummary {
    let mut summary = RunSummary {
        found: images.len(),
        ..Default::default()
    };
    info!("Processing {} images...", images.len());

    for path in images {
        observer.image_started(path);
        let classification = pipeline.classify_path(path);
        let written = materialize(path, &classification, organizer, &mut summary);
        if written {
            summary.processed += 1;
        } else {
            summary.write_failures += 1;
        }
        observer.image_finished(path, &classification);
    }

    summary.log(organizer.output_dir());
    summary
}

/// Write outputs for one image. Returns false if any write failed.
fn materialize(
    path: &Path,
    classification: &Classification,
    organizer: &Organizer,
    summary: &mut RunSummary,
) -> bool {
    let name = display_name(path);

    match &classification.outcome {
        MatchOutcome::Matched { marker, suffix, .. } => {
            let image_ok = match organizer.store_matched(path, marker, suffix) {
                Ok(_) => {
                    summary.organized += 1;
                    true
                }
                Err(e) => {
                    error!("Error organizing {}: {}", name, e);
                    false
                }
            };
            // The sidecar keeps the matched stem even if the image copy failed.
            let sidecar = organizer
                .matched_image_path(path, marker, suffix)
                .map(|p| p.with_extension("txt"));
            write_text(organizer, sidecar, classification, &name) && image_ok
        }
        MatchOutcome::NoMatch { reason } => {
            match reason {
                UnmatchedReason::NoText => summary.unmatched_no_text += 1,
                UnmatchedReason::NoPatternMatched => summary.unmatched_no_pattern += 1,
            }
            let sidecar = organizer.unmatched_sidecar_path(path);
            write_text(organizer, sidecar, classification, &name)
        }
    }
}

fn write_text(
    organizer: &Organizer,
    sidecar: Result<PathBuf, OrganizeError>,
    classification: &Classification,
    name: &str,
) -> bool {
    match sidecar.and_then(|p| organizer.write_sidecar(&p, &classification.text)) {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to write OCR text for {}: {}", name, e);
            false
        }
    }
}
