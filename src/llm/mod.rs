//! Model client abstraction.
//!
//! The [`ModelClient`] trait is the single seam between the debate runtime
//! and concrete LLM providers: send a prompt to a named model, get a
//! completion back, record latency/tokens/outcome. No retries and no
//! queueing live here; those belong to the resilience layer.
//!
//! Cancellation is cooperative: the orchestrator drops the in-flight
//! future when a session is cancelled, which aborts the underlying
//! request. Deadlines are mandatory; drivers enforce them with
//! `tokio::time::timeout` and classify expiry as [`FailureKind::Timeout`].
//!
//! # Drivers
//!
//! - [`providers::OpenAiCompatClient`]: OpenAI-style chat completions
//! - [`providers::AnthropicClient`]: Anthropic messages API

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, InvokeError};

/// Model identifier as providers know it.
pub type ModelId = String;

/// A single chat message in a composed prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message author.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction.
    System,
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A composed prompt ready for invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    /// Ordered messages, system instruction first.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f32,
    /// Generation cap.
    pub max_tokens: u32,
}

impl Prompt {
    /// Create a prompt from a system instruction and a user message.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: 0.7,
            max_tokens: 1_024,
        }
    }

    /// Override the sampling temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Override the generation cap.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Concatenated text content, used for rough token accounting.
    #[must_use]
    pub fn text_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// Why generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural stop.
    Stop,
    /// Generation cap reached.
    Length,
    /// Provider filtered the output.
    ContentFilter,
    /// Provider reported something else.
    Other,
}

/// A successful model completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text.
    pub text: String,
    /// Prompt tokens consumed.
    pub input_tokens: u32,
    /// Completion tokens produced.
    pub output_tokens: u32,
    /// Wall-clock latency of the call, in milliseconds.
    pub latency_ms: u64,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
}

impl Completion {
    /// Total tokens across prompt and completion.
    #[must_use]
    pub const fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Single abstraction for "send a prompt to a named model".
///
/// Implementations must enforce the deadline and classify failures into
/// [`FailureKind`]s; they must not retry.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Invoke the named model with the prompt under the given deadline.
    async fn invoke(
        &self,
        model: &ModelId,
        prompt: &Prompt,
        deadline: Duration,
    ) -> Result<Completion, InvokeError>;
}

/// Metric record emitted for every model call, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Model invoked.
    pub model: ModelId,
    /// Outcome classification; `None` on success.
    pub failure: Option<FailureKind>,
    /// Wall-clock latency in milliseconds.
    pub latency_ms: u64,
    /// Total tokens (0 on failure).
    pub tokens: u32,
    /// Rough cost estimate in USD.
    pub cost_estimate: f64,
    /// Record timestamp.
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Push receiver for per-call metrics.
///
/// The runtime does not care how metrics are transported; implementations
/// may forward to a metrics pipeline, a log, or nothing at all. Invoked
/// outside critical sections.
pub trait MetricsObserver: Send + Sync {
    /// Receive one call record.
    fn on_call(&self, record: &CallRecord);
}

/// Observer that drops every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl MetricsObserver for NoopObserver {
    fn on_call(&self, _record: &CallRecord) {}
}

/// Shared observer handle.
pub type ObserverHandle = Arc<dyn MetricsObserver>;

/// Rough cost estimate from token counts.
///
/// Providers bill very differently; this is a coarse blended rate kept
/// only so session statistics have a comparable cost column.
#[must_use]
pub fn estimate_cost(input_tokens: u32, output_tokens: u32) -> f64 {
    const INPUT_RATE_PER_1K: f64 = 0.003;
    const OUTPUT_RATE_PER_1K: f64 = 0.015;
    f64::from(input_tokens) / 1_000.0 * INPUT_RATE_PER_1K
        + f64::from(output_tokens) / 1_000.0 * OUTPUT_RATE_PER_1K
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_builders() {
        let prompt = Prompt::new("You are a debater.", "Argue the motion.")
            .with_temperature(0.9)
            .with_max_tokens(512);

        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[0].role, ChatRole::System);
        assert_eq!(prompt.messages[1].role, ChatRole::User);
        assert!((prompt.temperature - 0.9).abs() < f32::EPSILON);
        assert_eq!(prompt.max_tokens, 512);
    }

    #[test]
    fn test_prompt_text_len() {
        let prompt = Prompt::new("abc", "defg");
        assert_eq!(prompt.text_len(), 7);
    }

    #[test]
    fn test_completion_total_tokens() {
        let completion = Completion {
            text: "hello".into(),
            input_tokens: 120,
            output_tokens: 30,
            latency_ms: 250,
            finish_reason: FinishReason::Stop,
        };
        assert_eq!(completion.total_tokens(), 150);
    }

    #[test]
    fn test_cost_estimate_monotonic() {
        assert!(estimate_cost(1_000, 1_000) > estimate_cost(100, 100));
        assert!(estimate_cost(0, 0).abs() < f64::EPSILON);
    }
}
