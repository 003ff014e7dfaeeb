use indicatif::{ProgressBar, ProgressStyle};
use slide_translator_core::ProgressSink;
use slide_translator_core::progress::{BatchEvent, BatchStatus, Stage};

/// Terminal progress bar, reset for each stage of the job.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        // Template is hardcoded and valid, unwrap is safe
        #[allow(clippy::unwrap_used)]
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] {msg:<12} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
                .unwrap()
                .progress_chars("#>-"),
        );
        Self { bar }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for BarProgress {
    fn stage_started(&self, stage: Stage, batches: usize) {
        self.bar.set_length(batches as u64);
        self.bar.set_position(0);
        self.bar.set_message(stage.to_string());
    }

    fn batch_done(&self, event: &BatchEvent<'_>) {
        match event.status {
            BatchStatus::Failed => self.bar.println(format!(
                "{} failed ({} fragments)",
                event.batch_id, event.fragments
            )),
            BatchStatus::Skipped => self.bar.println(format!("{} (already done)", event.batch_id)),
            BatchStatus::Translated => {}
        }
        self.bar.inc(1);
    }
}
