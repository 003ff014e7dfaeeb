//! Collapse fragments with identical text onto one representative id.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::fragment::{FragmentSet, TranslationResult};

/// Every fragment id mapped to the representative id sharing its text.
///
/// Representatives map to themselves. Built once per job before any
/// translation call and persisted in the checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DuplicateMap(IndexMap<String, String>);

impl DuplicateMap {
    pub fn representative(&self, id: &str) -> Option<&str> {
        self.0.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(id, rep)| (id.as_str(), rep.as_str()))
    }

    /// Number of ids that are not their own representative.
    pub fn duplicate_count(&self) -> usize {
        self.0.iter().filter(|(id, rep)| id != rep).count()
    }

    pub fn is_representative(&self, id: &str) -> bool {
        self.representative(id) == Some(id)
    }

    /// Fan translations of representatives back out to every original id.
    ///
    /// A translation stored under the id itself wins over the
    /// representative's; ids with neither are left out.
    pub fn expand(&self, translated: &TranslationResult) -> TranslationResult {
        self.0
            .iter()
            .filter_map(|(id, rep)| {
                translated
                    .get(id)
                    .or_else(|| translated.get(rep))
                    .map(|text| (id.clone(), text.clone()))
            })
            .collect()
    }
}

impl FromIterator<(String, String)> for DuplicateMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Output of [`dedupe`]
#[derive(Debug, Clone, Default)]
pub struct Deduplicated {
    /// Representative ids only, in first-seen order
    pub unique: FragmentSet,
    pub duplicates: DuplicateMap,
}

/// Pick the first id seen for each distinct text as its representative.
pub fn dedupe(fragments: &FragmentSet) -> Deduplicated {
    let mut by_text: HashMap<&str, &str> = HashMap::with_capacity(fragments.len());
    let mut unique = FragmentSet::with_capacity(fragments.len());
    let mut duplicates = IndexMap::with_capacity(fragments.len());

    for (id, text) in fragments {
        let rep = *by_text.entry(text.as_str()).or_insert_with(|| {
            unique.insert(id.clone(), text.clone());
            id.as_str()
        });
        duplicates.insert(id.clone(), rep.to_string());
    }

    let eliminated = fragments.len() - unique.len();
    info!(
        "Found {} duplicate fragments, {} unique of {} to translate",
        eliminated,
        unique.len(),
        fragments.len()
    );

    Deduplicated {
        unique,
        duplicates: DuplicateMap(duplicates),
    }
}
