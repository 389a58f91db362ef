//! Marker patterns and whole-word matching.
//!
//! The pattern file is a JSON object mapping marker strings to output
//! filename suffixes:
//!
//! ```json
//! {
//!   "Ex1": "2025_01_20",
//!   "Ex2": "2025_02_13kim"
//! }
//! ```
//!
//! Document order is significant: when several markers occur in the same
//! text, the entry listed first wins.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on the compiled size of a single marker pattern.
const MARKER_REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Errors loading or validating a pattern table.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("failed to read pattern file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write default pattern file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid pattern file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("marker must not be empty")]
    EmptyMarker,

    #[error("duplicate marker '{0}'")]
    DuplicateMarker(String),
}

/// One marker and the suffix it selects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternEntry {
    pub marker: String,
    pub suffix: String,
}

/// Ordered, validated marker -> suffix table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternTable {
    entries: Vec<PatternEntry>,
}

impl PatternTable {
    /// Build a table from pairs in priority order.
    pub fn from_pairs<I, M, S>(pairs: I) -> Result<Self, PatternError>
    where
        I: IntoIterator<Item = (M, S)>,
        M: Into<String>,
        S: Into<String>,
    {
        let mut table = Self::default();
        for (marker, suffix) in pairs {
            table.push(marker.into(), suffix.into())?;
        }
        Ok(table)
    }

    /// Table written when no pattern file exists yet.
    pub fn default_table() -> Self {
        Self {
            entries: vec![
                PatternEntry {
                    marker: "Ex1".to_string(),
                    suffix: "2025_01_20".to_string(),
                },
                PatternEntry {
                    marker: "Ex2".to_string(),
                    suffix: "2025_02_13kim".to_string(),
                },
            ],
        }
    }

    fn push(&mut self, marker: String, suffix: String) -> Result<(), PatternError> {
        if marker.is_empty() {
            return Err(PatternError::EmptyMarker);
        }
        if self.entries.iter().any(|e| e.marker == marker) {
            return Err(PatternError::DuplicateMarker(marker));
        }
        if let Some(earlier) = self
            .entries
            .iter()
            .find(|e| e.marker.to_lowercase() == marker.to_lowercase())
        {
            warn!(
                "Marker '{}' differs from '{}' only by case and will never match first",
                marker, earlier.marker
            );
        }
        self.entries.push(PatternEntry { marker, suffix });
        Ok(())
    }

    /// Entries in priority order.
    pub fn entries(&self) -> &[PatternEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse a table from JSON text.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load the table from `path`, writing the default table first if the
    /// file does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self, PatternError> {
        if !path.exists() {
            let table = Self::default_table();
            table.save(path)?;
            info!("Created default pattern file at {}", path.display());
            return Ok(table);
        }

        let contents = fs::read_to_string(path).map_err(|source| PatternError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let table = Self::from_json(&contents).map_err(|source| PatternError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded {} patterns from {}", table.len(), path.display());
        Ok(table)
    }

    /// Write the table as pretty-printed JSON, preserving order.
    pub fn save(&self, path: &Path) -> Result<(), PatternError> {
        let write_err = |source| PatternError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| write_err(e.into()))?;
        fs::write(path, json + "\n").map_err(write_err)
    }
}

impl Serialize for PatternTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in &self.entries {
            map.serialize_entry(&entry.marker, &entry.suffix)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PatternTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = PatternTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping marker strings to suffix strings")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut table = PatternTable::default();
                while let Some((marker, suffix)) = access.next_entry::<String, String>()? {
                    table.push(marker, suffix).map_err(de::Error::custom)?;
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// A successful marker lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub marker: String,
    pub suffix: String,
}

struct CompiledMarker {
    entry: PatternEntry,
    regex: Regex,
}

/// Compiled form of a [`PatternTable`], ready for repeated matching.
pub struct PatternMatcher {
    markers: Vec<CompiledMarker>,
    skipped: usize,
}

impl PatternMatcher {
    /// Compile every marker as a case-insensitive, whole-word literal.
    ///
    /// Markers that fail to compile are logged and left out; they never
    /// prevent later entries from matching.
    pub fn new(table: &PatternTable) -> Self {
        let mut markers = Vec::with_capacity(table.len());
        let mut skipped = 0;

        for entry in table.entries() {
            match compile_marker(&entry.marker) {
                Ok(regex) => markers.push(CompiledMarker {
                    entry: entry.clone(),
                    regex,
                }),
                Err(e) => {
                    warn!("Skipping malformed marker '{}': {}", entry.marker, e);
                    skipped += 1;
                }
            }
        }

        Self { markers, skipped }
    }

    /// Number of markers left out because they could not be compiled.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of usable markers.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// First marker (in table order) occurring in `text` as a whole word.
    pub fn find(&self, text: &str) -> Option<PatternMatch> {
        self.markers
            .iter()
            .find(|m| m.regex.is_match(text))
            .map(|m| {
                info!("Found exact match for pattern '{}'", m.entry.marker);
                PatternMatch {
                    marker: m.entry.marker.clone(),
                    suffix: m.entry.suffix.clone(),
                }
            })
    }
}

fn compile_marker(marker: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&format!(r"\b{}\b", regex::escape(marker)))
        .case_insensitive(true)
        .size_limit(MARKER_REGEX_SIZE_LIMIT)
        .build()
}
