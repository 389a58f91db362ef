//! scansort - OCR-driven scan classification.
//!
//! Runs a fast Tesseract pass over every image, falls back to DeepSeek-OCR
//! when that finds nothing useful, and files the image by the first marker
//! found in its text.

mod cli;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    // Initialize logging based on verbosity
    let default_filter = if cli::is_verbose() {
        "scansort=debug"
    } else if cli::is_quiet() {
        "scansort=warn"
    } else {
        "scansort=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(cli::progress::ProgressAwareWriter))
        .init();

    // The deep extractor drives its own runtime, so the CLI stays synchronous.
    cli::run()
}
