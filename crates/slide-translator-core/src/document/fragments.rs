use serde::{Deserialize, Serialize};

use super::{Document, DocumentContext, Extraction, TraversalOptions};
use crate::error::{Error, Result};
use crate::fragment::{FragmentSet, TranslationResult};

/// Pre-extracted fragments, optionally with slide context.
///
/// Accepts either `{"fragments": {...}, "context": [...]}` or a flat
/// `{id: text}` object. Always written back in the first form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentFile {
    pub fragments: FragmentSet,
    #[serde(default)]
    pub context: DocumentContext,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Repr {
    Full {
        fragments: FragmentSet,
        #[serde(default)]
        context: DocumentContext,
    },
    Flat(FragmentSet),
}

impl FragmentFile {
    pub fn new(fragments: FragmentSet) -> Self {
        Self {
            fragments,
            context: DocumentContext::new(),
        }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let repr: Repr = serde_json::from_value(value).map_err(|_| {
            Error::DocumentInvalid(
                "expected an object of string values or {\"fragments\": {...}}".to_string(),
            )
        })?;
        Ok(match repr {
            Repr::Full { fragments, context } => Self { fragments, context },
            Repr::Flat(fragments) => Self::new(fragments),
        })
    }
}

impl Document for FragmentFile {
    fn extract(&self, _options: &TraversalOptions) -> Extraction {
        Extraction {
            fragments: self
                .fragments
                .iter()
                .filter(|(_, text)| !text.trim().is_empty())
                .map(|(id, text)| (id.clone(), text.clone()))
                .collect(),
            context: self.context.clone(),
        }
    }

    fn apply(&mut self, translations: &TranslationResult) -> usize {
        let mut applied = 0;
        for (id, text) in &mut self.fragments {
            if let Some(translated) = translations.get(id) {
                text.clone_from(translated);
                applied += 1;
            }
        }
        applied
    }
}
