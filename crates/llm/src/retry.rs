//! Exponential-backoff retry around provider generation calls.
//!
//! The policy lives here, provider error classification lives in
//! [`crate::LlmError`]; neither leaks provider specifics into the other.

use std::time::Duration;

use tracing::{debug, warn};

use crate::{ChunkSink, GenerateRequest, GenerateResponse, LlmError, LlmProvider};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    fn delay_before(&self, attempt: u32) -> Duration {
        self.base_delay * self.factor.saturating_pow(attempt.saturating_sub(2))
    }
}

/// Run `provider.generate` under `policy`.
///
/// Retryable errors back off and retry up to `max_attempts`; fatal errors
/// and exhausted retries both collapse into an error-shaped
/// [`GenerateResponse`] so callers receive a normal envelope either way.
pub async fn generate_with_retry(
    provider: &dyn LlmProvider,
    policy: &RetryPolicy,
    request: GenerateRequest,
    chunks: Option<&dyn ChunkSink>,
) -> GenerateResponse {
    let mut last_message = String::new();

    for attempt in 1..=policy.max_attempts.max(1) {
        if attempt > 1 {
            let delay = policy.delay_before(attempt);
            debug!(attempt, ?delay, "backing off before LLM retry");
            tokio::time::sleep(delay).await;
        }

        match provider.generate(request.clone(), chunks).await {
            Ok(response) => return response,
            Err(LlmError::Fatal(message)) => {
                warn!(attempt, %message, "fatal LLM error, not retrying");
                return GenerateResponse::error("fatal", message);
            }
            Err(LlmError::Retryable(message)) => {
                warn!(attempt, %message, "retryable LLM error");
                last_message = message;
            }
        }
    }

    GenerateResponse::error("retries_exhausted", last_message)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
