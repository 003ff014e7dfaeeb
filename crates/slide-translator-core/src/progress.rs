//! Progress reporting hooks for long-running jobs.

use std::fmt;

use tracing::{info, warn};

/// Stage of a job that issues backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Translating,
    Recovering,
    FinalSweep,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Translating => "translating",
            Self::Recovering => "recovering",
            Self::FinalSweep => "final sweep",
        };
        f.write_str(name)
    }
}

/// How a single batch ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Translated,
    Failed,
    /// Already done in a previous run
    Skipped,
}

/// One batch finished, failed or was skipped.
#[derive(Debug, Clone)]
pub struct BatchEvent<'a> {
    pub stage: Stage,
    pub batch_id: &'a str,
    pub fragments: usize,
    pub status: BatchStatus,
}

/// Receives job progress. All methods default to doing nothing.
pub trait ProgressSink: Send + Sync {
    /// A stage is about to process `batches` batches.
    fn stage_started(&self, _stage: Stage, _batches: usize) {}

    fn batch_done(&self, _event: &BatchEvent<'_>) {}

    fn stage_finished(&self, _stage: Stage) {}
}

/// Discards all progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Reports progress through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn stage_started(&self, stage: Stage, batches: usize) {
        if batches > 0 {
            info!("Starting {} ({} batches)", stage, batches);
        }
    }

    fn batch_done(&self, event: &BatchEvent<'_>) {
        match event.status {
            BatchStatus::Translated => info!(
                "[{}] {} done ({} fragments)",
                event.stage, event.batch_id, event.fragments
            ),
            BatchStatus::Failed => warn!(
                "[{}] {} failed ({} fragments)",
                event.stage, event.batch_id, event.fragments
            ),
            BatchStatus::Skipped => info!("[{}] {} already complete", event.stage, event.batch_id),
        }
    }
}
