mod openai;
pub mod prompt;
mod traits;
mod usage;

pub use openai::OpenAiBackend;
pub use traits::{Backend, BackendInfo, BackendReply, BackendRequest, TokenUsage};
pub use usage::UsageTracker;

use crate::config::TranslatorConfig;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Create a backend from configuration
pub fn create_backend(config: &TranslatorConfig) -> Result<Arc<dyn Backend>> {
    if config.require_api_key && config.api_key.as_deref().is_none_or(str::is_empty) {
        return Err(Error::TranslationMissingApiKey);
    }

    Ok(Arc::new(OpenAiBackend::new(config)))
}
