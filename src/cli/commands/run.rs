//! The batch run.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Args;
use tracing::{info, warn};

use scansort::batch::run_batch;
use scansort::config::Settings;
use scansort::ocr::{DeepSeekExtractor, DevicePreference, TesseractExtractor};
use scansort::organize::Organizer;
use scansort::patterns::PatternTable;
use scansort::pipeline::ClassificationPipeline;
use scansort::scan::find_images;

use crate::cli::progress::BatchProgress;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Folder to scan recursively for images
    pub input: Option<PathBuf>,

    /// Output folder for organized images and OCR text
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Marker -> suffix JSON file (created with defaults if missing)
    #[arg(short, long)]
    pub patterns: Option<PathBuf>,

    /// Compute device for the deep stage (auto, metal, cuda, cpu)
    #[arg(long)]
    pub device: Option<DevicePreference>,

    /// Model for the deep stage (deepseek-ocr, paddleocr-vl, dots-ocr)
    #[arg(long)]
    pub model: Option<String>,

    /// Token limit per deep-stage call
    #[arg(long)]
    pub max_new_tokens: Option<u32>,

    /// Deep-stage timeout per image in seconds (0 disables)
    #[arg(long)]
    pub deep_timeout: Option<u64>,
}

impl RunArgs {
    /// Apply command-line overrides on top of loaded settings.
    pub fn apply_to_settings(self, settings: &mut Settings) {
        if let Some(input) = self.input {
            settings.input_dir = Some(input);
        }
        if let Some(output) = self.output {
            settings.output_dir = output;
        }
        if let Some(patterns) = self.patterns {
            settings.patterns_file = patterns;
        }
        if let Some(device) = self.device {
            settings.deep.device = device;
        }
        if let Some(model) = self.model {
            settings.deep.model = model;
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            settings.deep.max_new_tokens = max_new_tokens;
        }
        if let Some(timeout) = self.deep_timeout {
            settings.deep.timeout_secs = timeout;
        }
    }
}

/// Classify every image under the input folder.
pub fn cmd_run(mut settings: Settings, args: RunArgs) -> anyhow::Result<()> {
    args.apply_to_settings(&mut settings);

    let Some(input_dir) = settings.input_dir.clone() else {
        bail!("No input folder given. Pass one to `scansort run` or set input_dir in the settings file.");
    };
    if !input_dir.is_dir() {
        bail!("Input folder not found at '{}'", input_dir.display());
    }

    let patterns = PatternTable::load_or_create(&settings.patterns_file)
        .context("Failed to load pattern table")?;
    info!(
        "Loaded {} patterns from {}",
        patterns.len(),
        settings.patterns_file.display()
    );

    let fast = TesseractExtractor::new(settings.fast.clone())
        .context("Failed to initialize the fast OCR stage")?;
    let deep = DeepSeekExtractor::initialize(settings.deep.clone())
        .context("Failed to initialize the deep OCR stage")?;
    let pipeline = ClassificationPipeline::new(Box::new(fast), Box::new(deep), &patterns);

    let images = find_images(&input_dir)
        .with_context(|| format!("Failed to scan {}", input_dir.display()))?;
    if images.is_empty() {
        warn!("No images found in the specified folder.");
        return Ok(());
    }

    let organizer = Organizer::new(&settings.output_dir, settings.compression.clone());
    let progress = BatchProgress::new(images.len());
    let summary = run_batch(&images, &pipeline, &organizer, &progress);
    progress.finish();

    if summary.write_failures > 0 {
        warn!(
            "{} of {} images could not be written completely",
            summary.write_failures, summary.found
        );
    }
    Ok(())
}
