//! Collaborator contracts for language generation and embeddings.
//!
//! The engine never talks HTTP itself — providers are injected behind the
//! [`LlmProvider`] and [`EmbeddingProvider`] traits and the transport layer
//! (SDK wiring, auth, per-call timeouts) stays outside this workspace.

pub mod retry;
pub mod stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use retry::{RetryPolicy, generate_with_retry};
pub use stream::{ChunkRelay, ChunkSink, MpscChunkSink};

/// Reasoning budget requested from the provider.
///
/// Extended-thinking providers must pin temperature to 1 when reasoning is
/// enabled; that mapping is the provider's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub model: String,
    /// System-level instructions (persona, output contract).
    pub instructions: String,
    /// The assembled context + question.
    pub input: String,
    pub max_tokens: u32,
    pub reasoning_effort: ReasoningEffort,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Normal response envelope. Provider failures that exhausted retries are
/// also delivered through this shape (`had_error = true`) so callers never
/// see transport errors bubble across the boundary.
#[derive(Debug, Clone, Default)]
pub struct GenerateResponse {
    pub content: String,
    pub usage: Option<TokenUsage>,
    pub had_error: bool,
    pub error_type: Option<String>,
}

impl GenerateResponse {
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            content: format!("[Error: {}]", message.into()),
            usage: None,
            had_error: true,
            error_type: Some(kind.into()),
        }
    }
}

/// Provider-side failure classification.
///
/// Providers map their SDK errors into exactly these two kinds so the retry
/// policy can act without knowing provider specifics.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Transient (rate limit, 5xx, timeout). Eligible for backoff + retry.
    #[error("retryable provider error: {0}")]
    Retryable(String),
    /// Permanent (bad request, unsupported model, auth). Never retried.
    #[error("fatal provider error: {0}")]
    Fatal(String),
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// One generation call. When `chunks` is supplied the provider forwards
    /// streamed text through it as the tokens arrive; the final `content`
    /// must still carry the full concatenated text.
    async fn generate(
        &self,
        request: GenerateRequest,
        chunks: Option<&dyn ChunkSink>,
    ) -> Result<GenerateResponse, LlmError>;
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Fixed vector dimension for this brain (512 in the reference setup).
    fn dimension(&self) -> usize;

    /// Embed `text`, or `None` when the backend is unavailable — callers
    /// degrade to keyword-only scoring.
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_kind_and_bracketed_answer() {
        let response = GenerateResponse::error("rate_limit", "too many requests");
        assert!(response.had_error);
        assert_eq!(response.error_type.as_deref(), Some("rate_limit"));
        assert_eq!(response.content, "[Error: too many requests]");
    }

    #[test]
    fn reasoning_effort_serializes_lowercase() {
        let json = serde_json::to_string(&ReasoningEffort::High).unwrap();
        assert_eq!(json, "\"high\"");
    }
}
