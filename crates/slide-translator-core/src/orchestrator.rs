//! Resumable batch translation job.
//!
//! A job moves through fixed phases:
//!
//! ```text
//! Init -> Deduping -> Partitioning -> Translating -> Reconciling -> FinalSweep -> Done
//! ```
//!
//! The checkpoint is saved after every batch, so a crash at any point loses
//! at most the batch in flight. Resuming reloads the saved state, rebuilds
//! the same batches and skips those already completed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::batch::{Batch, Partitioner, chunk};
use crate::checkpoint::{CheckpointStore, FailedBatch, JobState, job_id};
use crate::config::AppConfig;
use crate::dedupe::dedupe;
use crate::document::DocumentContext;
use crate::error::{Error, Result};
use crate::fragment::{FragmentSet, TranslationResult, missing_ids, select};
use crate::progress::{BatchEvent, BatchStatus, NoProgress, ProgressSink, Stage};
use crate::repair;
use crate::translator::{Backend, UsageTracker, prompt};
use crate::util::preview;

/// Ids listed in the summary before truncation
const MISSING_PREVIEW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Init,
    Deduping,
    Partitioning,
    Translating,
    Reconciling,
    FinalSweep,
    Done,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Deduping => "deduping",
            Self::Partitioning => "partitioning",
            Self::Translating => "translating",
            Self::Reconciling => "reconciling failures",
            Self::FinalSweep => "final sweep",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// End-of-job report.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    /// Name of the backend that served the job
    pub backend: &'static str,
    pub total: usize,
    pub unique: usize,
    pub duplicates: usize,
    pub translated: usize,
    /// Ids still without a translation
    pub missing: Vec<String>,
    pub failed_batches: usize,
    pub partial_failures: usize,
    pub usage: UsageTracker,
    pub estimated_cost: f64,
}

impl JobSummary {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    pub fn missing_preview(&self) -> String {
        preview(&self.missing, MISSING_PREVIEW)
    }
}

impl fmt::Display for JobSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Job {} ({})", self.job_id, self.backend)?;
        writeln!(
            f,
            "  Fragments:   {} total, {} unique, {} duplicates",
            self.total, self.unique, self.duplicates
        )?;
        writeln!(f, "  Translated:  {}/{}", self.translated, self.total)?;
        if !self.missing.is_empty() {
            writeln!(f, "  Missing:     {} ({})", self.missing.len(), self.missing_preview())?;
        }
        if self.failed_batches > 0 {
            writeln!(
                f,
                "  Failed:      {} batches ({} partially recovered)",
                self.failed_batches, self.partial_failures
            )?;
        }
        write!(
            f,
            "  API usage:   {} calls, {} input + {} output tokens (~${:.4})",
            self.usage.api_calls, self.usage.input_tokens, self.usage.output_tokens, self.estimated_cost
        )
    }
}

/// Result of a finished job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// Translation for every input id that has one, in input order
    pub result: TranslationResult,
    pub summary: JobSummary,
    pub checkpoint_path: PathBuf,
}

/// Options for a single run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume from this checkpoint instead of starting fresh
    pub resume: Option<PathBuf>,
    /// Recorded in the checkpoint and its file name
    pub file_id: Option<String>,
}

pub struct Orchestrator {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    store: CheckpointStore,
    progress: Arc<dyn ProgressSink>,
    phase: JobPhase,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn Backend>, config: AppConfig) -> Self {
        let store = CheckpointStore::new(config.checkpoint.dir.clone());
        Self {
            backend,
            config,
            store,
            progress: Arc::new(NoProgress),
            phase: JobPhase::Init,
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: CheckpointStore) -> Self {
        self.store = store;
        self
    }

    pub const fn phase(&self) -> JobPhase {
        self.phase
    }

    fn enter(&mut self, phase: JobPhase) {
        debug!("Job phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Translate `fragments`, checkpointing along the way.
    ///
    /// Only configuration problems and other fatal errors end the run with
    /// an error; batch failures are recorded and reported in the summary.
    pub async fn run(
        &mut self,
        fragments: &FragmentSet,
        context: &DocumentContext,
        options: RunOptions,
    ) -> Result<JobOutcome> {
        self.phase = JobPhase::Init;
        self.config.validate()?;
        self.config.ensure_credentials()?;

        let source = self.config.source_lang.clone();
        let target = self.config.target_lang.clone();

        let (mut state, path) = match options.resume.as_deref() {
            Some(path) => (self.resume_state(path)?, path.to_path_buf()),
            None => {
                let id = job_id(&source, &target, fragments);
                let mut state = JobState::new(id, source.clone(), target.clone(), fragments.len());
                if let Some(file_id) = options.file_id {
                    state = state.with_file_id(file_id);
                }
                let path = self.store.create(&state)?;
                info!(
                    "Started job {} on {} ({})",
                    state.job_id,
                    self.backend.info().name,
                    path.display()
                );
                (state, path)
            }
        };

        self.enter(JobPhase::Deduping);
        if state.duplicate_map.is_empty() && !fragments.is_empty() {
            state.duplicate_map = dedupe(fragments).duplicates;
            state.total_fragment_count = fragments.len();
            state.touch();
            CheckpointStore::save(&path, &state)?;
        }
        let unique: FragmentSet = fragments
            .iter()
            .filter(|(id, _)| state.duplicate_map.is_representative(id))
            .map(|(id, text)| (id.clone(), text.clone()))
            .collect();
        let uncovered = fragments
            .keys()
            .filter(|id| state.duplicate_map.representative(id).is_none())
            .count();
        if uncovered > 0 {
            warn!(
                "{} fragments are not in the checkpoint; the final sweep will pick them up",
                uncovered
            );
        }

        self.enter(JobPhase::Partitioning);
        let max_tokens = self.config.batch.effective_max_tokens(&target);
        let batches = Partitioner::new(max_tokens, self.config.batch.prompt_overhead)
            .with_item_overhead(self.config.batch.per_item_overhead)
            .partition(&unique);

        let context_json = prompt::render_context(context)?;

        self.enter(JobPhase::Translating);
        self.translate_batches(&batches, &context_json, &mut state, &path)
            .await?;

        self.enter(JobPhase::Reconciling);
        self.reconcile_failures(fragments, &context_json, &mut state, &path)
            .await?;

        self.enter(JobPhase::FinalSweep);
        self.final_sweep(fragments, &context_json, &mut state, &path)
            .await?;

        self.enter(JobPhase::Done);
        state.touch();
        CheckpointStore::save(&path, &state)?;

        let full = state.reconstruct();
        let result: TranslationResult = fragments
            .keys()
            .filter_map(|id| full.get(id).map(|text| (id.clone(), text.clone())))
            .collect();
        let summary = self.summarize(fragments, unique.len(), &result, &state);

        if summary.is_complete() {
            info!("Job {} complete: {} fragments translated", summary.job_id, summary.translated);
        } else {
            warn!(
                "Job {} finished with {} missing translations: {}",
                summary.job_id,
                summary.missing.len(),
                summary.missing_preview()
            );
        }

        Ok(JobOutcome {
            result,
            summary,
            checkpoint_path: path,
        })
    }

    fn resume_state(&self, path: &Path) -> Result<JobState> {
        let state = CheckpointStore::load(path)?;
        if state.source_lang != self.config.source_lang || state.target_lang != self.config.target_lang {
            return Err(Error::ConfigInvalid {
                field: "target_lang".to_string(),
                reason: format!(
                    "checkpoint {} is for {} -> {}, not {} -> {}",
                    path.display(),
                    state.source_lang,
                    state.target_lang,
                    self.config.source_lang,
                    self.config.target_lang
                ),
            });
        }
        info!(
            "Resuming job {}: {} batches done, {} failed, {:.1}% translated",
            state.job_id,
            state.completed_batch_ids.len(),
            state.failed_batches.len(),
            state.progress_percent()
        );
        Ok(state)
    }

    async fn translate_batches(
        &self,
        batches: &[Batch],
        context_json: &str,
        state: &mut JobState,
        path: &Path,
    ) -> Result<()> {
        self.progress.stage_started(Stage::Translating, batches.len());

        for batch in batches {
            if state.is_completed(&batch.id) {
                self.report(Stage::Translating, batch, BatchStatus::Skipped);
                continue;
            }

            let pending = Batch {
                id: batch.id.clone(),
                fragments: state
                    .untranslated(&batch.fragments)
                    .map(|(id, text)| (id.clone(), text.clone()))
                    .collect(),
                estimated_tokens: batch.estimated_tokens,
            };
            if pending.is_empty() {
                state.record_success(Some(batch.id.as_str()), TranslationResult::new());
                CheckpointStore::save(path, state)?;
                self.report(Stage::Translating, batch, BatchStatus::Skipped);
                continue;
            }

            match self
                .translate_batch(&pending, context_json, self.config.retry.max_retries, state)
                .await
            {
                Ok(translations) => {
                    state.record_success(Some(batch.id.as_str()), translations);
                    self.report(Stage::Translating, &pending, BatchStatus::Translated);
                }
                Err(e) if e.is_fatal() => {
                    CheckpointStore::save(path, state)?;
                    return Err(e);
                }
                Err(e) => {
                    error!("Batch {} failed: {}", batch.id, e);
                    state.record_failure(FailedBatch::new(&batch.id, pending.ids(), e.to_string()));
                    self.report(Stage::Translating, &pending, BatchStatus::Failed);
                }
            }
            CheckpointStore::save(path, state)?;
        }

        self.progress.stage_finished(Stage::Translating);
        Ok(())
    }

    /// Split each failed batch into smaller sub-batches and retry them.
    ///
    /// A failed batch is dropped from the list only when every one of its
    /// sub-batches succeeds; otherwise it stays with the ids still missing.
    async fn reconcile_failures(
        &self,
        fragments: &FragmentSet,
        context_json: &str,
        state: &mut JobState,
        path: &Path,
    ) -> Result<()> {
        if state.failed_batches.is_empty() {
            return Ok(());
        }

        let target = self.config.target_lang.clone();
        let failed = state.failed_batches.clone();
        info!("Attempting recovery of {} failed batches", failed.len());
        state.recovery_rounds += 1;

        let plans: Vec<(FailedBatch, Vec<Batch>)> = failed
            .into_iter()
            .map(|entry| {
                let pending: Vec<&String> = entry
                    .pending_ids()
                    .iter()
                    .filter(|id| !state.translated.contains_key(*id))
                    .collect();
                let size = self
                    .config
                    .retry
                    .recovery_chunk_size(entry.fragment_ids.len(), &target);
                let subs = chunk(
                    &select(fragments, pending),
                    size,
                    &format!("{}_sub_", entry.batch_id),
                );
                (entry, subs)
            })
            .collect();

        let total: usize = plans.iter().map(|(_, subs)| subs.len()).sum();
        self.progress.stage_started(Stage::Recovering, total);

        for (mut entry, subs) in plans {
            let mut unresolved = Vec::new();
            let mut last_error = None;

            // Sub-batch ids are not stable across runs; never skip by id here
            for sub in &subs {
                match self
                    .translate_batch(sub, context_json, self.config.retry.recovery_max_retries, state)
                    .await
                {
                    Ok(translations) => {
                        state.record_success(Some(sub.id.as_str()), translations);
                        self.report(Stage::Recovering, sub, BatchStatus::Translated);
                    }
                    Err(e) if e.is_fatal() => {
                        CheckpointStore::save(path, state)?;
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("Recovery batch {} failed: {}", sub.id, e);
                        unresolved.extend(sub.ids());
                        last_error = Some(e.to_string());
                        self.report(Stage::Recovering, sub, BatchStatus::Failed);
                    }
                }
                CheckpointStore::save(path, state)?;
            }

            if unresolved.is_empty() {
                info!("Recovered batch {}", entry.batch_id);
                state.failed_batches.retain(|f| f.batch_id != entry.batch_id);
                state.touch();
            } else {
                warn!(
                    "Batch {} still has {} unresolved fragments",
                    entry.batch_id,
                    unresolved.len()
                );
                entry.unresolved_ids = unresolved;
                entry.recovery_attempts += 1;
                if let Some(e) = last_error {
                    entry.error = e;
                }
                state.record_failure(entry);
            }
            CheckpointStore::save(path, state)?;
        }

        self.progress.stage_finished(Stage::Recovering);
        Ok(())
    }

    /// One more pass over every id that still has no translation.
    async fn final_sweep(
        &self,
        fragments: &FragmentSet,
        context_json: &str,
        state: &mut JobState,
        path: &Path,
    ) -> Result<()> {
        let missing = missing_ids(fragments, &state.reconstruct());
        if missing.is_empty() {
            return Ok(());
        }

        // Translate each representative once
        let mut reps: Vec<String> = Vec::new();
        for id in &missing {
            let rep = state
                .duplicate_map
                .representative(id)
                .unwrap_or(id)
                .to_string();
            if !reps.contains(&rep) {
                reps.push(rep);
            }
        }

        info!(
            "Final sweep for {} missing fragments ({} unique): {}",
            missing.len(),
            reps.len(),
            preview(&missing, MISSING_PREVIEW)
        );

        let size = self
            .config
            .retry
            .final_sweep_chunk_size(&self.config.target_lang);
        let sweeps = chunk(&select(fragments, &reps), size, "final_");
        self.progress.stage_started(Stage::FinalSweep, sweeps.len());

        for sweep in &sweeps {
            match self
                .translate_batch(sweep, context_json, self.config.retry.recovery_max_retries, state)
                .await
            {
                Ok(translations) => {
                    state.record_success(None, translations);
                    self.report(Stage::FinalSweep, sweep, BatchStatus::Translated);
                }
                Err(e) if e.is_fatal() => {
                    CheckpointStore::save(path, state)?;
                    return Err(e);
                }
                Err(e) => {
                    warn!("Final sweep batch {} failed: {}", sweep.id, e);
                    self.report(Stage::FinalSweep, sweep, BatchStatus::Failed);
                }
            }
            CheckpointStore::save(path, state)?;
        }

        self.progress.stage_finished(Stage::FinalSweep);
        Ok(())
    }

    /// Send one batch, retrying transient and parse failures.
    ///
    /// Other errors fail the batch at once without using up the retry budget.
    ///
    /// Replies are repaired, filtered to the requested ids and stringified.
    /// A reply containing none of the requested ids counts as a failure;
    /// partial replies succeed and leave the gaps to the final sweep.
    async fn translate_batch(
        &self,
        batch: &Batch,
        context_json: &str,
        max_retries: u32,
        state: &mut JobState,
    ) -> Result<TranslationResult> {
        let request = prompt::build_request(
            batch,
            context_json,
            &self.config.source_lang,
            &self.config.target_lang,
        )?;
        let retry = &self.config.retry;
        let attempts = max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            debug!(
                "Translating {} ({} fragments), attempt {}/{}",
                batch.id,
                batch.len(),
                attempt,
                attempts
            );

            let delay_ms = match self.backend.complete(&request).await {
                Ok(reply) => {
                    state.usage.record(reply.usage);
                    match repair::parse(&reply.text) {
                        Ok(mapping) => {
                            let translations: TranslationResult = mapping
                                .into_iter()
                                .filter(|(id, _)| batch.fragments.contains_key(id))
                                .map(|(id, value)| (id, value.into_text()))
                                .collect();
                            if !translations.is_empty() {
                                if translations.len() < batch.len() {
                                    warn!(
                                        "{}: {} of {} fragments missing from reply",
                                        batch.id,
                                        batch.len() - translations.len(),
                                        batch.len()
                                    );
                                }
                                return Ok(translations);
                            }
                            last_error = "reply contained none of the requested ids".to_string();
                        }
                        Err(e) => last_error = e.to_string(),
                    }
                    warn!("{}: unusable reply on attempt {}: {}", batch.id, attempt, last_error);
                    retry.parse_retry_delay_ms
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if !e.is_transient() => {
                    warn!("{}: attempt {} failed, not retrying: {}", batch.id, attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", batch.id, attempt, e);
                    let delay = match &e {
                        Error::TranslationRateLimited {
                            retry_after: Some(secs),
                        } => secs.saturating_mul(1000),
                        _ => retry.error_retry_delay_ms,
                    };
                    last_error = e.to_string();
                    delay
                }
            };

            if attempt < attempts && delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Err(Error::TranslationMaxRetriesExceeded {
            batch_id: batch.id.clone(),
            attempts,
            last_error,
        })
    }

    fn report(&self, stage: Stage, batch: &Batch, status: BatchStatus) {
        self.progress.batch_done(&BatchEvent {
            stage,
            batch_id: &batch.id,
            fragments: batch.len(),
            status,
        });
    }

    fn summarize(
        &self,
        fragments: &FragmentSet,
        unique: usize,
        result: &TranslationResult,
        state: &JobState,
    ) -> JobSummary {
        JobSummary {
            job_id: state.job_id.clone(),
            backend: self.backend.info().name,
            total: fragments.len(),
            unique,
            duplicates: fragments.len().saturating_sub(unique),
            translated: result.len(),
            missing: missing_ids(fragments, result),
            failed_batches: state.failed_batches.len(),
            partial_failures: state.failed_batches.iter().filter(|f| f.is_partial()).count(),
            usage: state.usage,
            estimated_cost: state.usage.estimated_cost(&self.config.pricing),
        }
    }
}
