//! Batch progress display.
//!
//! Also provides global progress context so log output from any part of the
//! application is printed above the bar instead of through it.

use std::io::{self, Write};
use std::path::Path;
use std::sync::{OnceLock, RwLock};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use scansort::batch::BatchObserver;
use scansort::pipeline::{display_name, Classification};
use tracing_subscriber::fmt::MakeWriter;

/// Global reference to the active progress bar for coordinating output.
static ACTIVE_PROGRESS: OnceLock<RwLock<Option<ProgressBar>>> = OnceLock::new();

fn get_active_progress() -> &'static RwLock<Option<ProgressBar>> {
    ACTIVE_PROGRESS.get_or_init(|| RwLock::new(None))
}

/// Set the global active progress bar.
pub fn set_active_progress(bar: Option<ProgressBar>) {
    if let Ok(mut guard) = get_active_progress().write() {
        *guard = bar;
    }
}

/// Write raw bytes to stderr, hiding the active progress bar meanwhile.
/// Falls back to plain stderr if no progress bar is active.
fn progress_write(bytes: &[u8]) {
    if let Ok(guard) = get_active_progress().read() {
        if let Some(ref bar) = *guard {
            bar.suspend(|| {
                let _ = io::stderr().write_all(bytes);
            });
            return;
        }
    }
    let _ = io::stderr().write_all(bytes);
}

/// `tracing` writer that routes every log line through [`progress_write`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressAwareWriter;

impl<'a> MakeWriter<'a> for ProgressAwareWriter {
    type Writer = LineBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        LineBuffer::default()
    }
}

/// Collects one formatted event and emits it on drop.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl Write for LineBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            progress_write(&self.buf);
            self.buf.clear();
        }
        Ok(())
    }
}

impl Drop for LineBuffer {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Progress bar over the images of one run.
pub struct BatchProgress {
    bar: ProgressBar,
}

impl BatchProgress {
    /// Create and register the bar for `total` images.
    pub fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("█▓░"));
        }
        bar.set_message("Processing images");
        bar.enable_steady_tick(Duration::from_millis(100));

        // Register as active progress display for coordinated output
        set_active_progress(Some(bar.clone()));

        Self { bar }
    }

    /// Clear the bar and unregister it.
    pub fn finish(&self) {
        self.bar.finish_and_clear();
        set_active_progress(None);
    }
}

impl Drop for BatchProgress {
    fn drop(&mut self) {
        set_active_progress(None);
    }
}

impl BatchObserver for BatchProgress {
    fn image_started(&self, path: &Path) {
        let name = display_name(path);
        self.bar
            .set_message(format!("Processing {}", truncate_filename(&name, 40)));
    }

    fn image_finished(&self, _path: &Path, _classification: &Classification) {
        self.bar.inc(1);
    }
}

/// Truncate a filename for display, keeping the extension visible.
fn truncate_filename(name: &str, max_len: usize) -> String {
    let len = name.chars().count();
    if len <= max_len {
        return name.to_string();
    }

    // Try to keep the extension
    if let Some(dot_pos) = name.rfind('.') {
        let ext = &name[dot_pos..];
        let ext_len = ext.chars().count();
        if ext_len + 4 < max_len {
            let prefix: String = name.chars().take(max_len - ext_len - 3).collect();
            return format!("{}...{}", prefix, ext);
        }
    }

    let prefix: String = name.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", prefix)
}
