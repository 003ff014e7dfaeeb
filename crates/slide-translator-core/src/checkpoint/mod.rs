//! Durable job state so an interrupted job can resume where it stopped.

mod state;

pub use state::{FailedBatch, JobState};

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::Lang;
use crate::error::{Error, Result};
use crate::fragment::{FragmentSet, TranslationResult};

const FILE_PREFIX: &str = "recovery_";

/// Stable id for a job: same language pair and fragments, same id.
pub fn job_id(source: &Lang, target: &Lang, fragments: &FragmentSet) -> String {
    let mut entries: Vec<(&String, &String)> = fragments.iter().collect();
    entries.sort();

    // Null separators keep ("a", "bc") and ("ab", "c") apart
    let mut combined = format!("{}\0{}", source.as_str(), target.as_str());
    for (id, text) in entries {
        combined.push('\0');
        combined.push_str(id);
        combined.push('\0');
        combined.push_str(text);
    }

    let hash = format!("{:x}", md5::compute(combined.as_bytes()));
    hash[..12].to_string()
}

/// One checkpoint as shown by `list`.
#[derive(Debug, Clone)]
pub struct CheckpointSummary {
    pub path: PathBuf,
    pub job_id: String,
    pub file_id: Option<String>,
    pub source_lang: Lang,
    pub target_lang: Lang,
    pub translated: usize,
    pub total: usize,
    pub progress_percent: f64,
    pub failed_batches: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointSummary {
    fn new(path: PathBuf, state: &JobState) -> Self {
        Self {
            path,
            job_id: state.job_id.clone(),
            file_id: state.file_id.clone(),
            source_lang: state.source_lang.clone(),
            target_lang: state.target_lang.clone(),
            translated: state.reconstruct().len(),
            total: state.total_fragment_count,
            progress_percent: state.progress_percent(),
            failed_batches: state
                .failed_batches
                .iter()
                .map(|f| f.batch_id.clone())
                .collect(),
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// A file in the checkpoint directory, readable or not.
#[derive(Debug, Clone)]
pub enum ListedCheckpoint {
    Valid(CheckpointSummary),
    Unreadable { path: PathBuf, reason: String },
}

/// Directory of `recovery_{job}_{timestamp}.json` files.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a new job's checkpoint.
    pub fn path_for(&self, state: &JobState) -> PathBuf {
        let label = state.file_id.as_deref().map_or_else(
            || state.job_id.clone(),
            |file| format!("{}_{}", sanitize(file), state.job_id),
        );
        self.dir.join(format!(
            "{FILE_PREFIX}{label}_{}.json",
            state.created_at.format("%Y%m%d_%H%M%S")
        ))
    }

    /// Write the first checkpoint of a new job and return its path.
    pub fn create(&self, state: &JobState) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| Error::CheckpointWrite {
            path: self.dir.clone(),
            reason: format!("Failed to create checkpoint directory: {e}"),
        })?;
        let path = self.path_for(state);
        Self::save(&path, state)?;
        debug!("Created checkpoint {}", path.display());
        Ok(path)
    }

    /// Replace the checkpoint at `path` atomically.
    ///
    /// The state is written to a temporary file in the same directory and
    /// renamed over the target, so a crash leaves either the old or the new
    /// version, never a torn one.
    pub fn save(path: &Path, state: &JobState) -> Result<()> {
        let write_err = |reason: String| Error::CheckpointWrite {
            path: path.to_path_buf(),
            reason,
        };
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| write_err(format!("Failed to create temporary file: {e}")))?;
        serde_json::to_writer_pretty(&mut tmp, state).map_err(|e| write_err(e.to_string()))?;
        tmp.flush().map_err(|e| write_err(e.to_string()))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| write_err(e.to_string()))?;
        tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<JobState> {
        if !path.exists() {
            return Err(Error::CheckpointNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::CheckpointRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| Error::CheckpointRead {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// All checkpoints in the directory, oldest file name first. A missing
    /// directory yields an empty list.
    pub fn list(&self) -> Result<Vec<ListedCheckpoint>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::CheckpointRead {
                    path: self.dir.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_checkpoint_file(path))
            .collect();
        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| match Self::load(&path) {
                Ok(state) => ListedCheckpoint::Valid(CheckpointSummary::new(path, &state)),
                Err(e) => {
                    warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                    ListedCheckpoint::Unreadable {
                        path,
                        reason: e.to_string(),
                    }
                }
            })
            .collect())
    }

    /// Translations stored in a checkpoint, duplicates expanded.
    pub fn export_translations(path: &Path) -> Result<TranslationResult> {
        Ok(Self::load(path)?.reconstruct())
    }
}

fn is_checkpoint_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FILE_PREFIX) && n.ends_with(".json"))
}

fn sanitize(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(pairs: &[(&str, &str)]) -> FragmentSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_job_id_ignores_order() {
        let en = Lang::new("en");
        let fr = Lang::new("fr");
        let a = job_id(&en, &fr, &set(&[("a", "1"), ("b", "2")]));
        let b = job_id(&en, &fr, &set(&[("b", "2"), ("a", "1")]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
        assert_ne!(a, job_id(&en, &Lang::new("de"), &set(&[("a", "1"), ("b", "2")])));
    }

    #[test]
    fn test_path_includes_file_and_timestamp() {
        let store = CheckpointStore::new("/tmp/recovery");
        let state =
            JobState::new("abc123", Lang::new("en"), Lang::new("fr"), 0).with_file_id("deck v2.json");
        let name = store.path_for(&state);
        let name = name.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("recovery_deck_v2_json_abc123_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("nested"));
        let mut state = JobState::new("job1", Lang::new("en"), Lang::new("ja"), 2);
        let path = store.create(&state).unwrap();

        state.record_success(Some("batch_1"), set(&[("a", "こんにちは")]));
        CheckpointStore::save(&path, &state).unwrap();

        let loaded = CheckpointStore::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_load_missing() {
        let err = CheckpointStore::load(Path::new("/nonexistent/recovery_x.json")).unwrap_err();
        assert!(matches!(err, Error::CheckpointNotFound(_)));
    }

    #[test]
    fn test_list_reports_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let state = JobState::new("job1", Lang::new("en"), Lang::new("fr"), 4);
        store.create(&state).unwrap();
        std::fs::write(dir.path().join("recovery_broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 2);
        let valid = listed
            .iter()
            .filter(|l| matches!(l, ListedCheckpoint::Valid(_)))
            .count();
        assert_eq!(valid, 1);
    }

    #[test]
    fn test_list_missing_dir() {
        let store = CheckpointStore::new("/nonexistent/translation_recovery");
        assert!(store.list().unwrap().is_empty());
    }
}
