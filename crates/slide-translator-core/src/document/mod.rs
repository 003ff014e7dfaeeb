//! Source documents: fragment extraction and write-back.

mod deck;
mod fragments;

pub use deck::{Deck, Shape, ShapeKind, Slide};
pub use fragments::FragmentFile;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fragment::{FragmentSet, TranslationResult};

/// Condensed per-slide text sent alongside each batch for terminology
/// consistency. Never translated itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlideSummary {
    pub slide_number: usize,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: Vec<String>,
}

pub type DocumentContext = Vec<SlideSummary>;

/// Which parts of a document are extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    pub include_notes: bool,
    pub include_tables: bool,
    pub include_charts: bool,
    /// Nesting depth followed into grouped shapes; 0 skips groups entirely
    pub max_group_depth: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self {
            include_notes: true,
            include_tables: true,
            include_charts: true,
            max_group_depth: 8,
        }
    }
}

impl TraversalOptions {
    /// Plain text shapes only.
    pub const fn text_only() -> Self {
        Self {
            include_notes: false,
            include_tables: false,
            include_charts: false,
            max_group_depth: 0,
        }
    }
}

/// Fragments plus the context they were pulled from.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub fragments: FragmentSet,
    pub context: DocumentContext,
}

/// A document whose text can be extracted and replaced by id.
pub trait Document {
    /// Collect every non-blank text fragment, keyed by location id.
    fn extract(&self, options: &TraversalOptions) -> Extraction;

    /// Replace the text at every recognised id. Returns the number of
    /// fragments written; unknown ids are ignored.
    fn apply(&mut self, translations: &TranslationResult) -> usize;
}

/// Any supported input file, detected from its JSON shape.
#[derive(Debug, Clone)]
pub enum DocumentFile {
    Deck(Deck),
    Fragments(FragmentFile),
}

impl DocumentFile {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::DocumentRead(format!("Failed to read file {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| Error::DocumentInvalid(format!("Not valid JSON: {e}")))?;

        if value.get("slides").is_some_and(serde_json::Value::is_array) {
            debug!("Detected slide deck document");
            let deck = serde_json::from_value(value)
                .map_err(|e| Error::DocumentInvalid(format!("Invalid deck: {e}")))?;
            Ok(Self::Deck(deck))
        } else {
            debug!("Detected fragment file");
            Ok(Self::Fragments(FragmentFile::from_value(value)?))
        }
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        let json = match self {
            Self::Deck(deck) => serde_json::to_string_pretty(deck)?,
            Self::Fragments(file) => serde_json::to_string_pretty(file)?,
        };
        Ok(json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json_pretty()?)?;
        Ok(())
    }
}

impl Document for DocumentFile {
    fn extract(&self, options: &TraversalOptions) -> Extraction {
        match self {
            Self::Deck(deck) => deck.extract(options),
            Self::Fragments(file) => file.extract(options),
        }
    }

    fn apply(&mut self, translations: &TranslationResult) -> usize {
        match self {
            Self::Deck(deck) => deck.apply(translations),
            Self::Fragments(file) => file.apply(translations),
        }
    }
}
