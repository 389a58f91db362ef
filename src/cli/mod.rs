//! Command-line interface.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod commands;
pub mod progress;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use scansort::config::load_settings;

#[derive(Parser)]
#[command(name = "scansort")]
#[command(about = "Sort scanned images by markers found in their OCR text")]
#[command(version)]
pub struct Cli {
    /// Settings file path (overrides auto-discovery)
    #[arg(short, long, global = true, env = "SCANSORT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Check if quiet mode is enabled (for early logging setup).
pub fn is_quiet() -> bool {
    std::env::args().any(|arg| arg == "-q" || arg == "--quiet")
}

#[derive(Subcommand)]
enum Commands {
    /// Classify and organize every image under a folder
    Run(commands::run::RunArgs),

    /// Check availability of the OCR engines
    Check,

    /// Show the marker table in priority order
    Patterns {
        /// Patterns file (overrides settings)
        #[arg(short, long)]
        patterns: Option<PathBuf>,

        /// Show which marker this text would select
        #[arg(long)]
        text: Option<String>,
    },
}

/// Parse arguments and run the selected command.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let (settings, _config) = load_settings(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => commands::run::cmd_run(settings, args),
        Commands::Check => commands::check::cmd_check(&settings),
        Commands::Patterns { patterns, text } => {
            commands::patterns::cmd_patterns(&settings, patterns, text.as_deref())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "scansort",
            "-v",
            "run",
            "/scans",
            "-o",
            "out",
            "--device",
            "cpu",
            "--deep-timeout",
            "30",
        ])
        .unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.input, Some(PathBuf::from("/scans")));
                assert_eq!(args.output, Some(PathBuf::from("out")));
                assert_eq!(args.deep_timeout, Some(30));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["scansort", "-v", "-q", "check"]).is_err());
    }

    #[test]
    fn test_parse_patterns_text() {
        let cli = Cli::try_parse_from(["scansort", "patterns", "--text", "invoice Ex1"]).unwrap();
        match cli.command {
            Commands::Patterns { text, patterns } => {
                assert_eq!(text.as_deref(), Some("invoice Ex1"));
                assert!(patterns.is_none());
            }
            _ => panic!("expected patterns"),
        }
    }
}
