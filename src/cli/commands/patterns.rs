//! Pattern table inspection.

use std::path::PathBuf;

use anyhow::Context;
use console::style;

use scansort::config::Settings;
use scansort::patterns::{PatternMatcher, PatternTable};

/// List the marker table in priority order, optionally testing it on `text`.
pub fn cmd_patterns(
    settings: &Settings,
    patterns_file: Option<PathBuf>,
    text: Option<&str>,
) -> anyhow::Result<()> {
    let path = patterns_file.unwrap_or_else(|| settings.patterns_file.clone());
    let table = PatternTable::load_or_create(&path)
        .with_context(|| format!("Failed to load pattern table {}", path.display()))?;

    println!(
        "\n{} ({})",
        style("Patterns").bold(),
        style(path.display()).dim()
    );
    println!("{}", "-".repeat(50));
    if table.is_empty() {
        println!("  {}", style("(empty table: nothing will match)").yellow());
    }
    for (i, entry) in table.entries().iter().enumerate() {
        println!("  {:>3}. {:<20} -> {}", i + 1, entry.marker, entry.suffix);
    }

    let matcher = PatternMatcher::new(&table);
    if matcher.skipped() > 0 {
        println!(
            "\n{} {} marker(s) could not be compiled and are skipped",
            style("!").yellow(),
            matcher.skipped()
        );
    }

    if let Some(text) = text {
        println!();
        match matcher.find(text) {
            Some(found) => println!(
                "{} '{}' selects suffix '{}'",
                style("✓").green(),
                found.marker,
                found.suffix
            ),
            None => println!("{} No marker matches", style("✗").red()),
        }
    }

    Ok(())
}
