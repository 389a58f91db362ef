//! Configuration management.
//!
//! Settings are layered: built-in defaults, then an optional settings file
//! (TOML, YAML or JSON by extension), then command-line overrides applied by
//! the CLI. The marker -> suffix table lives in its own JSON file (see
//! [`crate::patterns`]); this file only says where to find it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ocr::{DeepSeekConfig, TesseractConfig};
use crate::organize::CompressionConfig;

/// Default pattern filename, resolved against the working directory.
pub const DEFAULT_PATTERNS_FILENAME: &str = "config.json";

/// Default output directory name.
pub const DEFAULT_OUTPUT_DIR: &str = "organized_images";

/// Settings file name looked up in the user config directory.
const SETTINGS_FILENAME: &str = "config.toml";

/// Effective settings for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Root folder to scan.
    pub input_dir: Option<PathBuf>,
    /// Flat output folder.
    pub output_dir: PathBuf,
    /// Marker -> suffix JSON file.
    pub patterns_file: PathBuf,
    /// Fast-stage engine.
    pub fast: TesseractConfig,
    /// Deep-stage engine.
    pub deep: DeepSeekConfig,
    /// Re-encoding of matched copies.
    pub compression: CompressionConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            patterns_file: PathBuf::from(DEFAULT_PATTERNS_FILENAME),
            fast: TesseractConfig::default(),
            deep: DeepSeekConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

/// Settings file structure. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "patterns")]
    pub patterns_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast: Option<TesseractConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deep: Option<DeepSeekConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<CompressionConfig>,
    /// Path this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Default location of the settings file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("scansort").join(SETTINGS_FILENAME))
    }

    /// Load from an explicit path, or from the default location if it exists.
    /// Returns an empty config when no file is found.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        match explicit {
            Some(path) => Self::load_from_path(path),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::load_from_path(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

        let mut config: Config = match ext {
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config {}", path.display()))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config {}", path.display()))?,
            _ => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?,
        };

        debug!("Loaded settings from {}", path.display());
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Directory relative paths in this file resolve against.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply this file's values on top of `settings`.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        let base_dir = self.base_dir().unwrap_or_default();
        let resolve = |p: &str| Self::resolve_path(p, &base_dir);

        if let Some(ref input) = self.input_dir {
            settings.input_dir = Some(resolve(input));
        }
        if let Some(ref output) = self.output_dir {
            settings.output_dir = resolve(output);
        }
        if let Some(ref patterns) = self.patterns_file {
            settings.patterns_file = resolve(patterns);
        }
        if let Some(ref fast) = self.fast {
            settings.fast = fast.clone();
            settings.fast.binary = resolve_binary_path(&fast.binary, &base_dir);
            settings.fast.tessdata_dir = fast
                .tessdata_dir
                .as_ref()
                .map(|d| resolve(&d.to_string_lossy()));
        }
        if let Some(ref deep) = self.deep {
            settings.deep = deep.clone();
            settings.deep.binary = resolve_binary_path(&deep.binary, &base_dir);
        }
        if let Some(ref compression) = self.compression {
            settings.compression = compression.clone();
        }
    }
}

/// Bare binary names stay as-is for PATH lookup; anything path-like is
/// resolved like other paths.
fn resolve_binary_path(binary: &Path, base_dir: &Path) -> PathBuf {
    let raw = binary.to_string_lossy();
    if binary.components().count() > 1 || raw.starts_with('~') {
        Config::resolve_path(&raw, base_dir)
    } else {
        binary.to_path_buf()
    }
}

/// Load settings: defaults overlaid with the settings file, if any.
pub fn load_settings(explicit: Option<&Path>) -> anyhow::Result<(Settings, Config)> {
    let config = Config::load(explicit)?;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    Ok((settings, config))
}
