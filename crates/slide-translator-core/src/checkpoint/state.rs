use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Lang;
use crate::dedupe::DuplicateMap;
use crate::fragment::{FragmentSet, TranslationResult};
use crate::translator::UsageTracker;

/// A batch that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedBatch {
    pub batch_id: String,
    /// Every fragment the batch was created with
    pub fragment_ids: Vec<String>,
    pub error: String,
    /// Ids still untranslated after the last recovery pass; empty until
    /// recovery has run
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_ids: Vec<String>,
    #[serde(default)]
    pub recovery_attempts: u32,
}

impl FailedBatch {
    pub fn new(batch_id: impl Into<String>, fragment_ids: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            batch_id: batch_id.into(),
            fragment_ids,
            error: error.into(),
            unresolved_ids: Vec::new(),
            recovery_attempts: 0,
        }
    }

    /// Ids the next recovery pass should work on.
    pub fn pending_ids(&self) -> &[String] {
        if self.unresolved_ids.is_empty() {
            &self.fragment_ids
        } else {
            &self.unresolved_ids
        }
    }

    /// Recovery resolved some but not all of the batch.
    pub fn is_partial(&self) -> bool {
        !self.unresolved_ids.is_empty() && self.unresolved_ids.len() < self.fragment_ids.len()
    }
}

/// Everything needed to resume a job, persisted after each batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    /// Input file name, when the job came from a file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub source_lang: Lang,
    pub target_lang: Lang,
    pub total_fragment_count: usize,
    pub completed_batch_ids: BTreeSet<String>,
    pub failed_batches: Vec<FailedBatch>,
    /// Translations keyed by representative id
    pub translated: TranslationResult,
    pub duplicate_map: DuplicateMap,
    #[serde(default)]
    pub recovery_rounds: u32,
    #[serde(default)]
    pub usage: UsageTracker,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobState {
    pub fn new(job_id: impl Into<String>, source_lang: Lang, target_lang: Lang, total: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            file_id: None,
            source_lang,
            target_lang,
            total_fragment_count: total,
            completed_batch_ids: BTreeSet::new(),
            failed_batches: Vec::new(),
            translated: TranslationResult::new(),
            duplicate_map: DuplicateMap::default(),
            recovery_rounds: 0,
            usage: UsageTracker::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_file_id(mut self, file_id: impl Into<String>) -> Self {
        self.file_id = Some(file_id.into());
        self
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn is_completed(&self, batch_id: &str) -> bool {
        self.completed_batch_ids.contains(batch_id)
    }

    /// Merge a successful batch. `batch_id` is `None` for final-sweep calls,
    /// which are recomputed on every run and never marked complete.
    pub fn record_success(&mut self, batch_id: Option<&str>, translations: TranslationResult) {
        self.translated.extend(translations);
        if let Some(id) = batch_id {
            self.completed_batch_ids.insert(id.to_string());
        }
        self.touch();
    }

    /// Record a batch that ran out of retries. A batch already listed is
    /// updated in place.
    pub fn record_failure(&mut self, failed: FailedBatch) {
        match self
            .failed_batches
            .iter_mut()
            .find(|f| f.batch_id == failed.batch_id)
        {
            Some(existing) => *existing = failed,
            None => self.failed_batches.push(failed),
        }
        self.touch();
    }

    pub fn untranslated<'a>(&self, fragments: &'a FragmentSet) -> impl Iterator<Item = (&'a String, &'a String)> {
        fragments
            .iter()
            .filter(|(id, _)| !self.translated.contains_key(*id))
    }

    /// Translations for every original id, duplicates included.
    pub fn reconstruct(&self) -> TranslationResult {
        let mut result = self.duplicate_map.expand(&self.translated);
        // Ids the duplicate map never saw, e.g. added to the input after a crash
        for (id, text) in &self.translated {
            result.entry(id.clone()).or_insert_with(|| text.clone());
        }
        result
    }

    /// Share of original fragments with a translation, 0..=100.
    #[allow(clippy::cast_precision_loss)]
    pub fn progress_percent(&self) -> f64 {
        if self.total_fragment_count == 0 {
            return 100.0;
        }
        let done = self.reconstruct().len().min(self.total_fragment_count);
        done as f64 * 100.0 / self.total_fragment_count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::dedupe;

    fn set(pairs: &[(&str, &str)]) -> FragmentSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_reconstruct_expands_duplicates() {
        let fragments = set(&[("a", "Hello"), ("b", "World"), ("c", "Hello")]);
        let mut state = JobState::new("job", Lang::new("en"), Lang::new("fr"), 3);
        state.duplicate_map = dedupe(&fragments).duplicates;
        state.record_success(Some("batch_1"), set(&[("a", "Bonjour"), ("b", "Monde")]));

        let result = state.reconstruct();
        assert_eq!(result["c"], "Bonjour");
        assert_eq!(result.len(), 3);
        assert!(state.is_completed("batch_1"));
        assert!((state.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_final_sweep_success_not_marked_complete() {
        let mut state = JobState::new("job", Lang::new("en"), Lang::new("fr"), 1);
        state.record_success(None, set(&[("a", "Bonjour")]));
        assert!(state.completed_batch_ids.is_empty());
        assert_eq!(state.reconstruct()["a"], "Bonjour");
    }

    #[test]
    fn test_record_failure_replaces_existing() {
        let mut state = JobState::new("job", Lang::new("en"), Lang::new("fr"), 4);
        let ids = vec!["a".to_string(), "b".to_string()];
        state.record_failure(FailedBatch::new("batch_1", ids.clone(), "timeout"));

        let mut again = FailedBatch::new("batch_1", ids, "parse");
        again.unresolved_ids = vec!["b".to_string()];
        state.record_failure(again);

        assert_eq!(state.failed_batches.len(), 1);
        assert!(state.failed_batches[0].is_partial());
        assert_eq!(state.failed_batches[0].pending_ids(), ["b".to_string()]);
    }

    #[test]
    fn test_untranslated_filters() {
        let fragments = set(&[("a", "Hello"), ("b", "World")]);
        let mut state = JobState::new("job", Lang::new("en"), Lang::new("fr"), 2);
        state.record_success(Some("batch_1"), set(&[("a", "Bonjour")]));
        let rest: Vec<&String> = state.untranslated(&fragments).map(|(id, _)| id).collect();
        assert_eq!(rest, vec!["b"]);
    }
}
