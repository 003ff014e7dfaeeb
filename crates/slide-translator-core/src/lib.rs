//! Slide Translator Core Library
//!
//! This library provides resumable, batched LLM translation for presentation
//! text:
//! - Fragment extraction from slide decks and fragment files
//! - Deduplication and token-bounded batching
//! - Translation via OpenAI-compatible APIs with retries and response repair
//! - Checkpointing so interrupted jobs resume without repeating work

pub mod batch;
pub mod checkpoint;
pub mod config;
pub mod dedupe;
pub mod document;
pub mod error;
pub mod estimate;
pub mod fragment;
pub mod orchestrator;
pub mod progress;
pub mod repair;
pub mod translator;
pub mod util;

pub use checkpoint::{CheckpointStore, CheckpointSummary, FailedBatch, JobState, ListedCheckpoint};
pub use config::{
    AppConfig, BatchConfig, CheckpointConfig, DEFAULT_SOURCE_LANG, DEFAULT_TARGET_LANG, Lang,
    PricingConfig, RetryConfig, TranslatorConfig,
};
pub use document::{
    Deck, Document, DocumentContext, DocumentFile, FragmentFile, SlideSummary, TraversalOptions,
};
pub use error::{Error, Result};
pub use fragment::{FragmentSet, TranslationResult};
pub use orchestrator::{JobOutcome, JobSummary, Orchestrator, RunOptions};
pub use progress::{LogProgress, NoProgress, ProgressSink};
pub use translator::{Backend, OpenAiBackend, create_backend};

use std::sync::Arc;
use tracing::info;

/// High-level translator that ties extraction, the job pipeline and
/// write-back together
pub struct SlideTranslator {
    backend: Arc<dyn Backend>,
    config: AppConfig,
    progress: Arc<dyn ProgressSink>,
}

/// A translated document plus the job report
pub struct TranslatedDocument<D> {
    pub document: D,
    /// Fragments written back into the document
    pub applied: usize,
    pub outcome: JobOutcome,
}

impl SlideTranslator {
    /// Create a new translator with the given configuration
    pub fn new(config: AppConfig) -> Result<Self> {
        let backend = create_backend(&config.translator)?;
        Ok(Self::with_backend(backend, config))
    }

    /// Create with a custom backend
    pub fn with_backend(backend: Arc<dyn Backend>, config: AppConfig) -> Self {
        Self {
            backend,
            config,
            progress: Arc::new(LogProgress),
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(Arc::clone(&self.backend), self.config.clone())
            .with_progress(Arc::clone(&self.progress))
    }

    /// Translate a bare fragment set.
    pub async fn translate_fragments(
        &self,
        fragments: &FragmentSet,
        context: &DocumentContext,
        options: RunOptions,
    ) -> Result<JobOutcome> {
        self.orchestrator().run(fragments, context, options).await
    }

    /// Extract, translate and write back a whole document.
    pub async fn translate_document<D: Document>(
        &self,
        mut document: D,
        traversal: &TraversalOptions,
        options: RunOptions,
    ) -> Result<TranslatedDocument<D>> {
        let extraction = document.extract(traversal);
        info!(
            "Extracted {} fragments from {} slides",
            extraction.fragments.len(),
            extraction.context.len()
        );

        let outcome = self
            .translate_fragments(&extraction.fragments, &extraction.context, options)
            .await?;
        let applied = document.apply(&outcome.result);
        info!("Applied {} translations", applied);

        Ok(TranslatedDocument {
            document,
            applied,
            outcome,
        })
    }

    pub const fn config(&self) -> &AppConfig {
        &self.config
    }
}
