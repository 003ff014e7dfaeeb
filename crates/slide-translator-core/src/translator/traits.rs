use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fragment::FragmentSet;

/// Information about a translation backend
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Human-readable name, shown in logs and job summaries
    pub name: &'static str,
}

/// One translation call: instructions, rendered user message, and the batch
/// payload it was rendered from.
#[derive(Debug, Clone)]
pub struct BackendRequest {
    /// Batch label used in logs and in the prompt
    pub label: String,
    pub system: String,
    pub user: String,
    pub payload: FragmentSet,
}

/// Token counts reported by the backend for one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Raw backend output. No guarantee of validity or completeness.
#[derive(Debug, Clone, Default)]
pub struct BackendReply {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

impl BackendReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// Trait for LLM translation backends
///
/// Implementations make a single attempt; retries, backoff and response
/// repair belong to the orchestrator.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Get information about this backend
    fn info(&self) -> BackendInfo;

    /// Send one request and return the raw response text
    async fn complete(&self, request: &BackendRequest) -> Result<BackendReply>;
}
