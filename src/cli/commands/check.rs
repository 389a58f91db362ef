//! Engine availability report.

use console::style;

use scansort::config::Settings;
use scansort::ocr::{select_device, DeepSeekExtractor, TesseractExtractor};

/// Print which OCR engines and devices are usable with the current settings.
pub fn cmd_check(settings: &Settings) -> anyhow::Result<()> {
    println!("\n{}", style("OCR Engine Status").bold());
    println!("{}", "-".repeat(50));

    println!("\n{}", style("Fast stage:").cyan());
    let tesseract_ok = TesseractExtractor::is_available(&settings.fast);
    print_status(
        "Tesseract",
        tesseract_ok,
        &TesseractExtractor::availability_hint(&settings.fast),
    );
    println!("  {:<15} {}", "Language", settings.fast.language);

    println!("\n{}", style("Deep stage:").cyan());
    let deepseek_ok = DeepSeekExtractor::is_available(&settings.deep);
    print_status(
        "DeepSeek",
        deepseek_ok,
        &DeepSeekExtractor::availability_hint(&settings.deep),
    );
    println!("  {:<15} {}", "Model", settings.deep.model);
    println!(
        "  {:<15} {} ({:?} requested)",
        "Device",
        select_device(settings.deep.device),
        settings.deep.device
    );

    println!("\n{}", style("Files:").cyan());
    println!(
        "  {:<15} {}",
        "Patterns",
        settings.patterns_file.display()
    );
    println!("  {:<15} {}", "Output", settings.output_dir.display());

    println!();
    if tesseract_ok && deepseek_ok {
        println!("{} Both OCR stages are ready", style("✓").green());
    } else {
        println!(
            "{} A run needs both OCR stages; install the missing engine first",
            style("!").yellow()
        );
    }

    Ok(())
}

fn print_status(name: &str, available: bool, hint: &str) {
    let status = if available {
        style("✓ available").green()
    } else {
        style("✗ not available").red()
    };
    println!("  {:<15} {}", name, status);
    if !available {
        println!("                  {}", style(hint).dim());
    }
}
