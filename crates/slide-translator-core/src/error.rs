use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for slide-translator-core
///
/// This enum encompasses all error cases that can occur in the library:
/// - Translation backend operations (requests, responses, rate limiting)
/// - Response parsing (every repair strategy exhausted)
/// - Checkpoint operations (reading, writing, listing)
/// - Document operations (loading, validating)
/// - Configuration operations (loading, validation)
/// - General I/O and JSON operations
#[derive(Error, Debug)]
pub enum Error {
    // ==========================================================================
    // Translation Errors
    // ==========================================================================
    /// Translation API request failed
    #[error("translation API request failed: {0}")]
    TranslationRequest(String),

    /// Invalid response from translation API
    #[error("invalid translation API response: {0}")]
    TranslationInvalidResponse(String),

    /// Rate limited by translation API
    #[error("translation rate limited{}", retry_after.map(|s| format!(", retry after {s} seconds")).unwrap_or_default())]
    TranslationRateLimited { retry_after: Option<u64> },

    /// API key not configured for translation service
    #[error("translation API key not configured")]
    TranslationMissingApiKey,

    /// Translation request timed out
    #[error("translation request timed out")]
    TranslationTimeout,

    /// Maximum retry attempts exceeded for a batch
    #[error("batch {batch_id} failed after {attempts} attempts: {last_error}")]
    TranslationMaxRetriesExceeded {
        batch_id: String,
        attempts: u32,
        last_error: String,
    },

    // ==========================================================================
    // Response Parsing Errors
    // ==========================================================================
    /// No repair strategy could recover a mapping from the model output
    #[error("could not parse model response: {0}")]
    Parse(String),

    // ==========================================================================
    // Checkpoint Errors
    // ==========================================================================
    /// Checkpoint file does not exist
    #[error("checkpoint not found: {}", .0.display())]
    CheckpointNotFound(PathBuf),

    /// Failed to read a checkpoint
    #[error("failed to read checkpoint {}: {reason}", path.display())]
    CheckpointRead { path: PathBuf, reason: String },

    /// Failed to write a checkpoint
    #[error("failed to write checkpoint {}: {reason}", path.display())]
    CheckpointWrite { path: PathBuf, reason: String },

    // ==========================================================================
    // Document Errors
    // ==========================================================================
    /// Failed to read or parse an input document
    #[error("failed to read document: {0}")]
    DocumentRead(String),

    /// Document content is structurally invalid
    #[error("invalid document: {0}")]
    DocumentInvalid(String),

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    /// Failed to load configuration file
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// Invalid configuration value
    #[error("invalid config value for '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ==========================================================================
    // I/O Errors
    // ==========================================================================
    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether retrying the same request may succeed.
    ///
    /// Configuration problems never heal on their own and abort the job.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TranslationRequest(_)
                | Self::TranslationInvalidResponse(_)
                | Self::TranslationRateLimited { .. }
                | Self::TranslationTimeout
                | Self::Parse(_)
        )
    }

    /// Configuration errors are fatal at job start.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TranslationMissingApiKey | Self::ConfigLoad(_) | Self::ConfigInvalid { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
