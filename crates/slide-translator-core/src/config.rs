use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Language codes following ISO 639-1 with regional variants
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Lang(pub String);

impl Lang {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Primary subtag, lowercased ("zh-CN" -> "zh").
    pub fn primary(&self) -> String {
        self.0
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    /// Whether the language is written in a wide (CJK) script.
    ///
    /// Batches into these languages hit response size limits sooner, so they
    /// get smaller defaults everywhere.
    pub fn is_wide_script(&self) -> bool {
        matches!(self.primary().as_str(), "ja" | "zh" | "ko")
    }
}

// Serde default functions for common languages
fn default_source_lang() -> Lang {
    Lang::new("en")
}

fn default_target_lang() -> Lang {
    Lang::new("fr")
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Lang {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Lang {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Translator backend configuration for OpenAI-compatible APIs.
///
/// Supports llama.cpp, Ollama, DeepSeek, OpenAI, and any other OpenAI-compatible API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Refuse to start without an API key (hosted providers)
    #[serde(default)]
    pub require_api_key: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl TranslatorConfig {
    /// Create a new translator config
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_base: api_base.into(),
            api_key,
            model: model.into(),
            ..Self::default()
        }
    }
}

const fn default_temperature() -> f32 {
    0.3
}

const fn default_max_output_tokens() -> u32 {
    4000
}

const fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080/v1".to_string(),
            api_key: None,
            model: "default_model".to_string(),
            require_api_key: false,
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Token budget used when partitioning fragments into batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Ceiling per request; `None` picks a default from the target language
    #[serde(default)]
    pub max_tokens: Option<usize>,

    /// Fixed cost of instructions and context sent with every batch
    #[serde(default = "default_prompt_overhead")]
    pub prompt_overhead: usize,

    /// Extra cost per item for JSON punctuation
    #[serde(default = "default_per_item_overhead")]
    pub per_item_overhead: usize,
}

pub const DEFAULT_MAX_TOKENS: usize = 100_000;
pub const DEFAULT_WIDE_SCRIPT_MAX_TOKENS: usize = 50_000;

const fn default_prompt_overhead() -> usize {
    2000
}

const fn default_per_item_overhead() -> usize {
    10
}

impl BatchConfig {
    pub fn effective_max_tokens(&self, target: &Lang) -> usize {
        self.max_tokens.unwrap_or(if target.is_wide_script() {
            DEFAULT_WIDE_SCRIPT_MAX_TOKENS
        } else {
            DEFAULT_MAX_TOKENS
        })
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_tokens: None,
            prompt_overhead: default_prompt_overhead(),
            per_item_overhead: default_per_item_overhead(),
        }
    }
}

/// Retry ceilings, delays and the shrink divisors for failed batches
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries per batch on the first pass (attempts = retries + 1)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Retries per sub-batch during recovery and the final sweep
    #[serde(default = "default_recovery_max_retries")]
    pub recovery_max_retries: u32,

    /// Delay after a response that no repair strategy could parse
    #[serde(default = "default_parse_retry_delay_ms")]
    pub parse_retry_delay_ms: u64,

    /// Delay after a request error
    #[serde(default = "default_error_retry_delay_ms")]
    pub error_retry_delay_ms: u64,

    /// Failed batches are split into chunks of `len / divisor`
    #[serde(default = "default_recovery_divisor")]
    pub recovery_divisor: usize,

    #[serde(default = "default_wide_script_recovery_divisor")]
    pub wide_script_recovery_divisor: usize,

    /// Lower bound on the recovery chunk size
    #[serde(default = "default_min_recovery_chunk")]
    pub min_recovery_chunk: usize,

    /// Chunk size for the final sweep over missing ids
    #[serde(default = "default_final_sweep_chunk")]
    pub final_sweep_chunk: usize,

    #[serde(default = "default_wide_script_final_sweep_chunk")]
    pub wide_script_final_sweep_chunk: usize,
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_recovery_max_retries() -> u32 {
    3
}

const fn default_parse_retry_delay_ms() -> u64 {
    3000
}

const fn default_error_retry_delay_ms() -> u64 {
    5000
}

const fn default_recovery_divisor() -> usize {
    10
}

const fn default_wide_script_recovery_divisor() -> usize {
    20
}

const fn default_min_recovery_chunk() -> usize {
    3
}

const fn default_final_sweep_chunk() -> usize {
    100
}

const fn default_wide_script_final_sweep_chunk() -> usize {
    50
}

impl RetryConfig {
    /// No delays at all, for tests and scripted backends.
    pub fn immediate() -> Self {
        Self {
            parse_retry_delay_ms: 0,
            error_retry_delay_ms: 0,
            ..Self::default()
        }
    }

    /// Chunk size used when splitting a failed batch of `len` fragments.
    pub fn recovery_chunk_size(&self, len: usize, target: &Lang) -> usize {
        let divisor = if target.is_wide_script() {
            self.wide_script_recovery_divisor
        } else {
            self.recovery_divisor
        };
        (len / divisor.max(1)).max(self.min_recovery_chunk).max(1)
    }

    pub fn final_sweep_chunk_size(&self, target: &Lang) -> usize {
        let size = if target.is_wide_script() {
            self.wide_script_final_sweep_chunk
        } else {
            self.final_sweep_chunk
        };
        size.max(1)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            recovery_max_retries: default_recovery_max_retries(),
            parse_retry_delay_ms: default_parse_retry_delay_ms(),
            error_retry_delay_ms: default_error_retry_delay_ms(),
            recovery_divisor: default_recovery_divisor(),
            wide_script_recovery_divisor: default_wide_script_recovery_divisor(),
            min_recovery_chunk: default_min_recovery_chunk(),
            final_sweep_chunk: default_final_sweep_chunk(),
            wide_script_final_sweep_chunk: default_wide_script_final_sweep_chunk(),
        }
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory holding one recovery file per job
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("translation_recovery")
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
        }
    }
}

/// Per-million-token prices used for the cost estimate in job summaries
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_input_per_million")]
    pub input_per_million: f64,
    #[serde(default = "default_output_per_million")]
    pub output_per_million: f64,
}

const fn default_input_per_million() -> f64 {
    3.0
}

const fn default_output_per_million() -> f64 {
    15.0
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            input_per_million: default_input_per_million(),
            output_per_million: default_output_per_million(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Source language
    #[serde(default = "default_source_lang")]
    pub source_lang: Lang,

    /// Target language
    #[serde(default = "default_target_lang")]
    pub target_lang: Lang,

    /// Translator backend configuration
    #[serde(default)]
    pub translator: TranslatorConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,

    #[serde(default)]
    pub pricing: PricingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source_lang: default_source_lang(),
            target_lang: default_target_lang(),
            translator: TranslatorConfig::default(),
            batch: BatchConfig::default(),
            retry: RetryConfig::default(),
            checkpoint: CheckpointConfig::default(),
            pricing: PricingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            crate::error::Error::ConfigLoad(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, crate::error::Error> {
        let config: Self = toml::from_str(content).map_err(|e| {
            crate::error::Error::ConfigLoad(format!("Failed to parse config: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from default locations (~/.config/slide-translator/config.toml, ./config.toml)
    pub fn load() -> Self {
        // Try user config
        if let Some(config_dir) = crate::util::config_dir() {
            let user_config = config_dir.join("slide-translator").join("config.toml");
            if user_config.exists() {
                match Self::from_file(&user_config) {
                    Ok(config) => {
                        tracing::debug!("Loaded config from {}", user_config.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // Try local config
        let local_config = std::path::PathBuf::from("config.toml");
        if local_config.exists() {
            match Self::from_file(&local_config) {
                Ok(config) => {
                    tracing::debug!("Loaded config from ./config.toml");
                    return config;
                }
                Err(e) => {
                    tracing::warn!("Failed to load ./config.toml: {}", e);
                }
            }
        }

        // Return defaults
        tracing::debug!("No config file found, using defaults");
        Self::default()
    }

    /// Reject values that would make the pipeline loop or divide by zero.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        let invalid = |field: &str, reason: &str| crate::error::Error::ConfigInvalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.source_lang.as_str().trim().is_empty() {
            return Err(invalid("source_lang", "must not be empty"));
        }
        if self.target_lang.as_str().trim().is_empty() {
            return Err(invalid("target_lang", "must not be empty"));
        }
        if let Some(max) = self.batch.max_tokens
            && max <= self.batch.prompt_overhead
        {
            return Err(invalid(
                "batch.max_tokens",
                "must be larger than batch.prompt_overhead",
            ));
        }
        if self.retry.recovery_max_retries < self.retry.max_retries {
            return Err(invalid(
                "retry.recovery_max_retries",
                "must not be lower than retry.max_retries",
            ));
        }
        if self.retry.recovery_divisor == 0 || self.retry.wide_script_recovery_divisor == 0 {
            return Err(invalid("retry.recovery_divisor", "must be at least 1"));
        }
        Ok(())
    }

    /// Fail fast when the backend needs a key that is not configured.
    pub fn ensure_credentials(&self) -> Result<(), crate::error::Error> {
        let missing = self
            .translator
            .api_key
            .as_deref()
            .is_none_or(|k| k.trim().is_empty());
        if self.translator.require_api_key && missing {
            return Err(crate::error::Error::TranslationMissingApiKey);
        }
        Ok(())
    }
}

/// Default source language code
pub const DEFAULT_SOURCE_LANG: &str = "en";
/// Default target language code
pub const DEFAULT_TARGET_LANG: &str = "fr";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wide_script_detection() {
        assert!(Lang::new("ja").is_wide_script());
        assert!(Lang::new("zh-CN").is_wide_script());
        assert!(Lang::new("KO").is_wide_script());
        assert!(!Lang::new("fr").is_wide_script());
        assert!(!Lang::new("en-US").is_wide_script());
    }

    #[test]
    fn test_language_dependent_budget() {
        let batch = BatchConfig::default();
        assert_eq!(batch.effective_max_tokens(&Lang::new("ja")), 50_000);
        assert_eq!(batch.effective_max_tokens(&Lang::new("de")), 100_000);

        let batch = BatchConfig {
            max_tokens: Some(8000),
            ..BatchConfig::default()
        };
        assert_eq!(batch.effective_max_tokens(&Lang::new("ja")), 8000);
    }

    #[test]
    fn test_recovery_chunk_size() {
        let retry = RetryConfig::default();
        assert_eq!(retry.recovery_chunk_size(200, &Lang::new("fr")), 20);
        assert_eq!(retry.recovery_chunk_size(200, &Lang::new("ja")), 10);
        // Never below the configured floor
        assert_eq!(retry.recovery_chunk_size(5, &Lang::new("fr")), 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml(
            r#"
            target_lang = "ja"

            [retry]
            max_retries = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.source_lang.as_str(), "en");
        assert_eq!(config.target_lang.as_str(), "ja");
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.recovery_max_retries, 3);
        assert_eq!(config.checkpoint.dir, PathBuf::from("translation_recovery"));
    }

    #[test]
    fn test_recovery_retries_exceed_first_pass() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_retries, 2);
        assert_eq!(retry.recovery_max_retries, 3);
        assert!(AppConfig::default().validate().is_ok());

        let result = AppConfig::from_toml(
            r"
            [retry]
            max_retries = 5
            ",
        );
        assert!(matches!(
            result,
            Err(crate::error::Error::ConfigInvalid { ref field, .. }) if field == "retry.recovery_max_retries"
        ));
    }

    #[test]
    fn test_validate_rejects_tiny_budget() {
        let result = AppConfig::from_toml(
            r"
            [batch]
            max_tokens = 100
            prompt_overhead = 2000
            ",
        );
        assert!(matches!(
            result,
            Err(crate::error::Error::ConfigInvalid { .. })
        ));
    }

    #[test]
    fn test_missing_api_key_is_fatal_when_required() {
        let mut config = AppConfig::default();
        assert!(config.ensure_credentials().is_ok());

        config.translator.require_api_key = true;
        assert!(matches!(
            config.ensure_credentials(),
            Err(crate::error::Error::TranslationMissingApiKey)
        ));

        config.translator.api_key = Some("sk-test".to_string());
        assert!(config.ensure_credentials().is_ok());
    }
}
